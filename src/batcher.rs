/// Request batching for batchable endpoints
///
/// Where the coalescer merges identical concurrent requests, the batcher
/// merges different-but-batchable ones: distinct params arriving for one
/// endpoint within a short window become a single upstream call, and the
/// batched response is demultiplexed back to each caller.
///
/// The first addition to an empty batch arms the window timer; reaching
/// max_batch_size drains early. A generation id per batch keeps a stale
/// timer from draining the batch that replaced the one it was armed for.
use crate::errors::{GatewayError, GatewayResult};
use crate::logger::{self, LogTag};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Scalar query parameters, also the unit of batching.
pub type Params = HashMap<String, String>;

/// One upstream call for the whole accumulated batch.
pub type BatchFetcher =
    Arc<dyn Fn(Vec<Params>) -> BoxFuture<'static, GatewayResult<Value>> + Send + Sync>;

/// Pulls one caller's slice out of the batched response.
pub type ExtractResult = Arc<dyn Fn(&Value, &Params) -> GatewayResult<Value> + Send + Sync>;

struct BatchEntry {
    params: Params,
    tx: oneshot::Sender<GatewayResult<Value>>,
}

struct PendingBatch {
    id: u64,
    entries: Vec<BatchEntry>,
}

/// Batcher counters for monitoring.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BatcherStats {
    pub requests_batched: u64,
    pub batches_flushed: u64,
    pub avg_batch_size: f64,
}

#[derive(Clone)]
pub struct RequestBatcher {
    batches: Arc<Mutex<HashMap<String, PendingBatch>>>,
    window: Duration,
    max_size: usize,
    next_id: Arc<AtomicU64>,
    requests_batched: Arc<AtomicU64>,
    batches_flushed: Arc<AtomicU64>,
}

impl RequestBatcher {
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            batches: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_size: max_size.max(1),
            next_id: Arc::new(AtomicU64::new(0)),
            requests_batched: Arc::new(AtomicU64::new(0)),
            batches_flushed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Join the open batch for `endpoint` (opening one if needed) and wait
    /// for this caller's slice of the batched response.
    pub async fn add_to_batch(
        &self,
        endpoint: &str,
        params: Params,
        batch_fetcher: BatchFetcher,
        extract_result: ExtractResult,
    ) -> GatewayResult<Value> {
        let (tx, rx) = oneshot::channel();

        let size_flush = {
            let mut batches = self.batches.lock().await;
            let batch = batches.entry(endpoint.to_string()).or_insert_with(|| PendingBatch {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                entries: Vec::new(),
            });
            let armed = batch.entries.is_empty();
            batch.entries.push(BatchEntry { params, tx });
            self.requests_batched.fetch_add(1, Ordering::Relaxed);

            if batch.entries.len() >= self.max_size {
                Some(batch.id)
            } else {
                if armed {
                    let batcher = self.clone();
                    let endpoint = endpoint.to_string();
                    let id = batch.id;
                    let fetcher = batch_fetcher.clone();
                    let extract = extract_result.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(batcher.window).await;
                        batcher.flush(&endpoint, id, fetcher, extract).await;
                    });
                }
                None
            }
        };

        if let Some(id) = size_flush {
            self.flush(endpoint, id, batch_fetcher, extract_result).await;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Batch(format!(
                "Batch for {} was dropped before settling",
                endpoint
            ))),
        }
    }

    /// Drain and execute the batch, but only if it is still the generation
    /// the caller armed - a newer batch keeps accumulating.
    async fn flush(
        &self,
        endpoint: &str,
        expected_id: u64,
        batch_fetcher: BatchFetcher,
        extract_result: ExtractResult,
    ) {
        let entries = {
            let mut batches = self.batches.lock().await;
            let current = batches.get(endpoint).map(|b| b.id == expected_id).unwrap_or(false);
            if !current {
                return;
            }
            batches
                .remove(endpoint)
                .map(|b| b.entries)
                .unwrap_or_default()
        };

        if entries.is_empty() {
            return;
        }

        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        logger::debug(
            LogTag::Batch,
            &format!("Flushing {} request(s) for {}", entries.len(), endpoint),
        );

        let all_params: Vec<Params> = entries.iter().map(|e| e.params.clone()).collect();
        match batch_fetcher(all_params).await {
            Ok(response) => {
                for entry in entries {
                    let result = extract_result(&response, &entry.params);
                    let _ = entry.tx.send(result);
                }
            }
            Err(e) => {
                logger::warning(
                    LogTag::Batch,
                    &format!("Batch for {} failed, failing all members: {}", endpoint, e),
                );
                for entry in entries {
                    let _ = entry.tx.send(Err(e.clone()));
                }
            }
        }
    }

    pub fn get_stats(&self) -> BatcherStats {
        let requests = self.requests_batched.load(Ordering::Relaxed);
        let batches = self.batches_flushed.load(Ordering::Relaxed);
        BatcherStats {
            requests_batched: requests,
            batches_flushed: batches,
            avg_batch_size: if batches == 0 {
                0.0
            } else {
                requests as f64 / batches as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn params_for(coin: &str) -> Params {
        let mut params = Params::new();
        params.insert("coin".to_string(), coin.to_string());
        params
    }

    /// Response is a map keyed by coin; each caller extracts its own slice.
    fn keyed_fetcher(calls: Arc<AtomicU32>) -> BatchFetcher {
        Arc::new(move |batch: Vec<Params>| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let mut response = serde_json::Map::new();
                for params in &batch {
                    let coin = params.get("coin").cloned().unwrap_or_default();
                    response.insert(coin.clone(), json!({ "price": coin.len() }));
                }
                Ok(Value::Object(response))
            })
        })
    }

    fn keyed_extract() -> ExtractResult {
        Arc::new(|response: &Value, params: &Params| {
            let coin = params.get("coin").cloned().unwrap_or_default();
            response
                .get(&coin)
                .cloned()
                .ok_or_else(|| GatewayError::Batch(format!("{} missing from batch response", coin)))
        })
    }

    #[tokio::test]
    async fn test_window_merges_distinct_requests() {
        let batcher = RequestBatcher::new(Duration::from_millis(50), 100);
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = keyed_fetcher(calls.clone());
        let extract = keyed_extract();

        let a = {
            let batcher = batcher.clone();
            let fetcher = fetcher.clone();
            let extract = extract.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("eth"), fetcher, extract)
                    .await
            })
        };
        let b = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("usdc"), fetcher, extract)
                    .await
            })
        };

        assert_eq!(a.await.unwrap().unwrap(), json!({"price": 3}));
        assert_eq!(b.await.unwrap().unwrap(), json!({"price": 4}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = batcher.get_stats();
        assert_eq!(stats.requests_batched, 2);
        assert_eq!(stats.batches_flushed, 1);
        assert!((stats.avg_batch_size - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_max_size_drains_before_window() {
        let batcher = RequestBatcher::new(Duration::from_secs(10), 2);
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = keyed_fetcher(calls.clone());
        let extract = keyed_extract();

        let start = Instant::now();
        let a = {
            let batcher = batcher.clone();
            let fetcher = fetcher.clone();
            let extract = extract.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("eth"), fetcher, extract)
                    .await
            })
        };
        let b = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("dai"), fetcher, extract)
                    .await
            })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        // Drained by size, not by the 10s window
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_fails_all_members() {
        let batcher = RequestBatcher::new(Duration::from_millis(30), 100);
        let fetcher: BatchFetcher = Arc::new(|_| {
            Box::pin(async {
                Err(GatewayError::UpstreamServerError {
                    status: 500,
                    body: "boom".to_string(),
                })
            })
        });
        let extract = keyed_extract();

        let a = {
            let batcher = batcher.clone();
            let fetcher = fetcher.clone();
            let extract = extract.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("eth"), fetcher, extract)
                    .await
            })
        };
        let b = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("dai"), fetcher, extract)
                    .await
            })
        };

        assert!(matches!(
            a.await.unwrap(),
            Err(GatewayError::UpstreamServerError { status: 500, .. })
        ));
        assert!(matches!(
            b.await.unwrap(),
            Err(GatewayError::UpstreamServerError { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_failure_is_per_member() {
        let batcher = RequestBatcher::new(Duration::from_millis(30), 100);
        let calls = Arc::new(AtomicU32::new(0));
        // Response only covers "eth"; the other member must get its own error
        let fetcher: BatchFetcher = {
            let calls = calls.clone();
            Arc::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(json!({"eth": {"price": 1}})) })
            })
        };
        let extract = keyed_extract();

        let a = {
            let batcher = batcher.clone();
            let fetcher = fetcher.clone();
            let extract = extract.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("eth"), fetcher, extract)
                    .await
            })
        };
        let b = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices", params_for("missing"), fetcher, extract)
                    .await
            })
        };

        assert_eq!(a.await.unwrap().unwrap(), json!({"price": 1}));
        assert!(matches!(b.await.unwrap(), Err(GatewayError::Batch(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batches_are_per_endpoint() {
        let batcher = RequestBatcher::new(Duration::from_millis(30), 100);
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = keyed_fetcher(calls.clone());
        let extract = keyed_extract();

        let a = {
            let batcher = batcher.clone();
            let fetcher = fetcher.clone();
            let extract = extract.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices/current", params_for("eth"), fetcher, extract)
                    .await
            })
        };
        let b = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .add_to_batch("/prices/historical", params_for("dai"), fetcher, extract)
                    .await
            })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
