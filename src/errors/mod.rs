/// Structured error handling for the caching gateway
///
/// Every failure that crosses the public surface is one of these variants;
/// nothing panics across the API boundary. Variants are `Clone` because a
/// single settled result is shared between all coalesced waiters.
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream request timed out after {seconds}s")]
    UpstreamTimeout { seconds: u64 },

    #[error("Upstream server error: HTTP {status}: {body}")]
    UpstreamServerError { status: u16, body: String },

    #[error("Upstream rate limited (retry-after: {retry_after:?})")]
    UpstreamRateLimited { retry_after: Option<Duration> },

    #[error("Upstream client error: HTTP {status}: {body}")]
    UpstreamClientError { status: u16, body: String },

    #[error("All {attempts} attempts exhausted for {endpoint}: {last_error}")]
    AllRetriesExhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Coalesced request timed out after {seconds}s")]
    CoalescedRequestTimeout { seconds: u64 },

    #[error("No cached value and no fetcher for key {key}")]
    NoFetcherAndCacheMiss { key: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Batch error: {0}")]
    Batch(String),
}

impl GatewayError {
    /// Whether the HTTP layer should retry this failure with backoff.
    ///
    /// 429 is deliberately not retryable here: it has its own path that
    /// honors the server-supplied delay without consuming the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTimeout { .. }
                | GatewayError::UpstreamServerError { .. }
                | GatewayError::Network(_)
        )
    }

    /// Server-mandated delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::UpstreamRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::UpstreamRateLimited { .. })
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
