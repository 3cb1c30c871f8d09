/// Upstream request statistics
///
/// One tracker shared by the HTTP layer and the gateway; polled by an
/// external observability collaborator through the combined snapshot.
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ApiStats {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    pub rate_limited_waits: u64,
    pub avg_response_ms: f64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ApiStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_requests as f64
        }
    }
}

pub struct ApiStatsTracker {
    stats: RwLock<ApiStats>,
}

impl ApiStatsTracker {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(ApiStats::default()),
        }
    }

    pub async fn record_request(&self, success: bool, elapsed_ms: f64) {
        let mut stats = self.stats.write().await;
        stats.total_requests += 1;
        if success {
            stats.successful += 1;
            stats.last_success_at = Some(Utc::now());
        } else {
            stats.failed += 1;
        }
        // Cumulative mean keeps the average stable over long uptimes
        stats.avg_response_ms += (elapsed_ms - stats.avg_response_ms) / stats.total_requests as f64;
    }

    pub async fn record_retry(&self) {
        self.stats.write().await.retries += 1;
    }

    pub async fn record_rate_limited(&self) {
        self.stats.write().await.rate_limited_waits += 1;
    }

    pub async fn record_error(&self, endpoint: &str, message: &str) {
        let mut stats = self.stats.write().await;
        stats.last_error = Some(format!("{}: {}", endpoint, message));
    }

    pub async fn get_stats(&self) -> ApiStats {
        self.stats.read().await.clone()
    }
}

impl Default for ApiStatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
