/// In-flight request coalescing (thundering-herd protection)
///
/// The first caller for a key spawns a driver task that runs the fetch and
/// feeds a shared handle; every concurrent caller for the same key awaits
/// that handle, so exactly one upstream call happens per in-flight window.
/// Settling - success or failure - removes the entry, so a failed fetch
/// never poisons the key.
///
/// Each waiter has its own timeout: giving up stops that waiter only, the
/// driver keeps running and later arrivals still get the result. A periodic
/// sweep force-fails entries older than twice the timeout so a hung fetch
/// cannot leak in-flight state forever.
use crate::errors::{GatewayError, GatewayResult};
use crate::logger::{self, LogTag};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{AbortHandle, JoinHandle};

type SharedResult = Shared<BoxFuture<'static, GatewayResult<Value>>>;

struct InFlightRequest {
    handle: SharedResult,
    started_at: Instant,
    waiter_count: u64,
    abort: AbortHandle,
}

/// Coalescer counters for monitoring.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CoalescerStats {
    pub total_requests: u64,
    pub coalesced: u64,
    pub initiated: u64,
    pub in_flight: usize,
    /// Fraction of requests that rode an existing fetch.
    pub savings_rate: f64,
}

#[derive(Clone)]
pub struct RequestCoalescer {
    in_flight: Arc<Mutex<HashMap<String, InFlightRequest>>>,
    timeout: Duration,
    cleanup_interval: Duration,
    total: Arc<AtomicU64>,
    coalesced: Arc<AtomicU64>,
    initiated: Arc<AtomicU64>,
    cleanup_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl RequestCoalescer {
    pub fn new(timeout: Duration, cleanup_interval: Duration) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            cleanup_interval,
            total: Arc::new(AtomicU64::new(0)),
            coalesced: Arc::new(AtomicU64::new(0)),
            initiated: Arc::new(AtomicU64::new(0)),
            cleanup_task: Arc::new(StdMutex::new(None)),
        }
    }

    /// Run `fetcher` for `key`, or ride an already in-flight fetch for the
    /// same key. Returns `CoalescedRequestTimeout` for a waiter that has
    /// waited past the configured timeout; the fetch itself is unaffected.
    pub async fn execute<F, Fut>(&self, key: &str, fetcher: F) -> GatewayResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Value>> + Send + 'static,
    {
        self.total.fetch_add(1, Ordering::Relaxed);

        let handle = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(entry) = in_flight.get_mut(key) {
                entry.waiter_count += 1;
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                entry.handle.clone()
            } else {
                self.initiated.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel::<GatewayResult<Value>>();

                let force_fail_secs = (self.timeout * 2).as_secs();
                let shared: SharedResult = async move {
                    match rx.await {
                        Ok(result) => result,
                        // Driver was aborted by the stall sweep or shutdown
                        Err(_) => Err(GatewayError::CoalescedRequestTimeout {
                            seconds: force_fail_secs,
                        }),
                    }
                }
                .boxed()
                .shared();

                let map = self.in_flight.clone();
                let owned_key = key.to_string();
                let fut = fetcher();
                let driver = tokio::spawn(async move {
                    let result = fut.await;
                    map.lock().await.remove(&owned_key);
                    let _ = tx.send(result);
                });

                in_flight.insert(
                    key.to_string(),
                    InFlightRequest {
                        handle: shared.clone(),
                        started_at: Instant::now(),
                        waiter_count: 1,
                        abort: driver.abort_handle(),
                    },
                );
                shared
            }
        };

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(result) => result,
            Err(_) => {
                logger::warning(
                    LogTag::Coalescer,
                    &format!(
                        "Waiter gave up on {} after {:?}; fetch continues for remaining waiters",
                        key, self.timeout
                    ),
                );
                Err(GatewayError::CoalescedRequestTimeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Force-fail entries that have been in flight longer than 2x timeout.
    pub async fn cleanup_stalled(&self) {
        let limit = self.timeout * 2;
        let mut in_flight = self.in_flight.lock().await;
        let stalled: Vec<String> = in_flight
            .iter()
            .filter(|(_, e)| e.started_at.elapsed() > limit)
            .map(|(k, _)| k.clone())
            .collect();

        for key in stalled {
            if let Some(entry) = in_flight.remove(&key) {
                entry.abort.abort();
                logger::warning(
                    LogTag::Coalescer,
                    &format!(
                        "Force-failed hung fetch for {} ({} waiters, in flight {:?})",
                        key,
                        entry.waiter_count,
                        entry.started_at.elapsed()
                    ),
                );
            }
        }
    }

    /// Start the periodic stall sweep. Idempotent per instance lifetime.
    pub fn start_cleanup_task(&self) {
        let mut slot = self.cleanup_task.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let coalescer = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coalescer.cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                coalescer.cleanup_stalled().await;
            }
        }));
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn get_stats(&self) -> CoalescerStats {
        let total = self.total.load(Ordering::Relaxed);
        let coalesced = self.coalesced.load(Ordering::Relaxed);
        CoalescerStats {
            total_requests: total,
            coalesced,
            initiated: self.initiated.load(Ordering::Relaxed),
            in_flight: self.in_flight.lock().await.len(),
            savings_rate: if total == 0 {
                0.0
            } else {
                coalesced as f64 / total as f64
            },
        }
    }

    /// Abort the sweep and every outstanding driver. Waiters receive the
    /// force-fail timeout error.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.cleanup_task.lock().unwrap().take() {
            handle.abort();
        }
        let mut in_flight = self.in_flight.lock().await;
        for (_, entry) in in_flight.drain() {
            entry.abort.abort();
        }
    }
}
