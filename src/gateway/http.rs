/// Retrying HTTP client for the upstream provider
///
/// One pooled keep-alive client for the process; every request goes through
/// the retry loop: retryable failures (timeouts, 5xx, connection errors)
/// back off exponentially up to the attempt budget, a 429 sleeps for the
/// server's Retry-After without consuming the budget, and any other 4xx
/// surfaces immediately.
use crate::batcher::Params;
use crate::config::HttpConfig;
use crate::errors::{GatewayError, GatewayResult};
use crate::logger::{self, LogTag};
use crate::stats::ApiStatsTracker;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fallback delay when a 429 carries no Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);

/// Budget-free 429 waits are capped so a misbehaving upstream cannot pin a
/// caller forever; past the cap the 429 is treated as a plain failure.
const MAX_RATE_LIMIT_WAITS: u32 = 5;

pub struct RetryingClient {
    client: reqwest::Client,
    config: HttpConfig,
    stats: Arc<ApiStatsTracker>,
}

impl RetryingClient {
    pub fn new(config: HttpConfig, stats: Arc<ApiStatsTracker>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(Duration::from_secs(config.keep_alive_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            stats,
        })
    }

    /// GET `url` with `params` as query string, retrying per policy.
    pub async fn get_json(&self, url: &str, params: &Params) -> GatewayResult<Value> {
        let mut attempt: u32 = 0;
        let mut rate_limit_waits: u32 = 0;
        let mut last_error: Option<GatewayError> = None;

        while attempt < self.config.max_retries {
            match self.execute_once(url, params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && rate_limit_waits < MAX_RATE_LIMIT_WAITS => {
                    rate_limit_waits += 1;
                    self.stats.record_rate_limited().await;
                    let delay = e.retry_after().unwrap_or(DEFAULT_RETRY_AFTER);
                    logger::warning(
                        LogTag::Http,
                        &format!("429 from {} - honoring retry-after {:?}", url, delay),
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() || e.is_rate_limited() => {
                    attempt += 1;
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        self.stats.record_retry().await;
                        let backoff = self.backoff_delay(attempt);
                        logger::debug(
                            LogTag::Http,
                            &format!(
                                "Attempt {}/{} failed for {}, backing off {:?}",
                                attempt, self.config.max_retries, url, backoff
                            ),
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(GatewayError::AllRetriesExhausted {
            endpoint: url.to_string(),
            attempts: self.config.max_retries,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Delay before retry number `attempt` (1-based): base * factor^(n-1).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let millis = self.config.backoff_base_ms as f64
            * self.config.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(millis as u64)
    }

    async fn execute_once(&self, url: &str, params: &Params) -> GatewayResult<Value> {
        let start = Instant::now();

        let mut builder = self.client.get(url);
        if !params.is_empty() {
            let mut query: Vec<(&str, &str)> =
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            query.sort();
            builder = builder.query(&query);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as f64;
                self.stats.record_request(false, elapsed).await;
                let error = if e.is_timeout() {
                    GatewayError::UpstreamTimeout {
                        seconds: self.config.timeout_secs,
                    }
                } else {
                    GatewayError::Network(e.to_string())
                };
                self.stats.record_error(url, &error.to_string()).await;
                return Err(error);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let elapsed = start.elapsed().as_millis() as f64;
            self.stats.record_request(false, elapsed).await;
            let error = classify_status(status.as_u16(), retry_after, body);
            self.stats.record_error(url, &error.to_string()).await;
            return Err(error);
        }

        match response.json::<Value>().await {
            Ok(value) => {
                self.stats
                    .record_request(true, start.elapsed().as_millis() as f64)
                    .await;
                Ok(value)
            }
            Err(e) => {
                self.stats
                    .record_request(false, start.elapsed().as_millis() as f64)
                    .await;
                let error = GatewayError::Parse(format!("Invalid JSON from {}: {}", url, e));
                self.stats.record_error(url, &error.to_string()).await;
                Err(error)
            }
        }
    }
}

/// Map a non-success status to the error taxonomy.
fn classify_status(status: u16, retry_after: Option<Duration>, body: String) -> GatewayError {
    match status {
        429 => GatewayError::UpstreamRateLimited { retry_after },
        500..=599 => GatewayError::UpstreamServerError { status, body },
        _ => GatewayError::UpstreamClientError { status, body },
    }
}

/// Integer-seconds Retry-After; HTTP-date forms are rare enough upstream
/// that they fall through to the default delay.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
