//! End-to-end gateway tests against a local HTTP fixture
//!
//! The fixture plays a canned script of responses and counts hits, so the
//! tests can assert on how often the network was actually touched.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tiny_http::{Response, Server};
use yieldgate::config::EndpointOverride;
use yieldgate::{ApiGateway, CacheType, GatewayConfig, GatewayError, Params};

struct Fixture {
    base_url: String,
    hits: Arc<AtomicU32>,
}

/// Serve `script` in order, then repeat the last entry. `delay` is applied
/// before every response.
fn spawn_fixture(script: Vec<(u16, serde_json::Value)>, delay: Duration) -> Fixture {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let hits = Arc::new(AtomicU32::new(0));

    let counter = hits.clone();
    std::thread::spawn(move || {
        let last = script.last().cloned().unwrap_or((200, json!({})));
        let mut script = script.into_iter();
        for request in server.incoming_requests() {
            counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = script.next().unwrap_or_else(|| last.clone());
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let _ = request.respond(
                Response::from_string(body.to_string()).with_status_code(status),
            );
        }
    });

    Fixture {
        base_url: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn gateway_against(fixture: &Fixture, mutate: impl FnOnce(&mut GatewayConfig)) -> ApiGateway {
    let mut config = GatewayConfig::default();
    config.http.backoff_base_ms = 10;
    for prefix in ["/pools", "/chart", "/prices", "/protocols", "/v2/chains"] {
        config.endpoints.push(EndpointOverride {
            prefix: prefix.to_string(),
            base_url: Some(fixture.base_url.clone()),
            tier: Some("high".to_string()),
        });
    }
    mutate(&mut config);
    ApiGateway::new(config).unwrap()
}

fn pools_body() -> serde_json::Value {
    json!({
        "status": "success",
        "data": [
            {"pool": "aave-base-usdc", "chain": "Base", "project": "aave-v3", "tvlUsd": 2_500_000.0, "apy": 4.2},
            {"pool": "comp-eth-usdc", "chain": "Ethereum", "project": "compound", "tvlUsd": 900_000.0, "apy": 3.1}
        ]
    })
}

#[tokio::test]
async fn test_back_to_back_fetch_hits_network_once() {
    let fixture = spawn_fixture(vec![(200, pools_body())], Duration::ZERO);
    let gateway = gateway_against(&fixture, |_| {});

    let mut params = Params::new();
    params.insert("chain".to_string(), "Base".to_string());

    let first = gateway.fetch("/pools", &params, CacheType::Pools).await.unwrap();
    let second = gateway.fetch("/pools", &params, CacheType::Pools).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);

    let stats = gateway.get_stats().await;
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.upstream.total_requests, 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_distinct_params_are_distinct_requests() {
    let fixture = spawn_fixture(vec![(200, pools_body())], Duration::ZERO);
    let gateway = gateway_against(&fixture, |_| {});

    let mut base = Params::new();
    base.insert("chain".to_string(), "Base".to_string());
    let mut arb = Params::new();
    arb.insert("chain".to_string(), "Arbitrum".to_string());

    gateway.fetch("/pools", &base, CacheType::Pools).await.unwrap();
    gateway.fetch("/pools", &arb, CacheType::Pools).await.unwrap();

    assert_eq!(fixture.hits.load(Ordering::SeqCst), 2);
    gateway.close().await;
}

#[tokio::test]
async fn test_concurrent_cold_fetches_coalesce_to_one_call() {
    let fixture = spawn_fixture(vec![(200, pools_body())], Duration::from_millis(200));
    let gateway = Arc::new(gateway_against(&fixture, |_| {}));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway
                .fetch("/pools", &Params::new(), CacheType::Pools)
                .await
                .unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_retry_then_success_is_invisible_to_caller() {
    let fixture = spawn_fixture(
        vec![
            (503, json!({"error": "unavailable"})),
            (503, json!({"error": "unavailable"})),
            (200, pools_body()),
        ],
        Duration::ZERO,
    );
    let gateway = gateway_against(&fixture, |_| {});

    let value = gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 3);

    let stats = gateway.get_stats().await;
    assert_eq!(stats.upstream.retries, 2);

    gateway.close().await;
}

#[tokio::test]
async fn test_fail_open_serves_last_known_after_outage() {
    let fixture = spawn_fixture(
        vec![(200, pools_body()), (500, json!({"error": "boom"}))],
        Duration::ZERO,
    );
    // Zero TTLs: the entry is expired the moment it lands, forcing the
    // second fetch back upstream into the outage.
    let gateway = gateway_against(&fixture, |config| {
        config.cache.pools_ttl_secs = 0;
        config.cache.pools_stale_ttl_secs = 0;
    });

    let first = gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();

    let second = gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();

    // Degraded but identical to the last good payload
    assert_eq!(first, second);
    let stats = gateway.get_stats().await;
    assert_eq!(stats.cache.degraded_returns, 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_cold_outage_surfaces_retries_exhausted() {
    let fixture = spawn_fixture(vec![(500, json!({"error": "down"}))], Duration::ZERO);
    let gateway = gateway_against(&fixture, |_| {});

    let result = gateway.fetch("/pools", &Params::new(), CacheType::Pools).await;
    assert!(matches!(
        result,
        Err(GatewayError::AllRetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 3);

    gateway.close().await;
}

#[tokio::test]
async fn test_get_pools_filters_client_side() {
    let fixture = spawn_fixture(vec![(200, pools_body())], Duration::ZERO);
    let gateway = gateway_against(&fixture, |_| {});

    let pools = gateway.get_pools(Some("Base"), None, None).await.unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0]["pool"], "aave-base-usdc");

    let rich = gateway.get_pools(None, None, Some(1_000_000.0)).await.unwrap();
    assert_eq!(rich.len(), 1);

    // Both wrapper calls shared one cached upstream fetch
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_get_prices_batches_distinct_coins() {
    let fixture = spawn_fixture(
        vec![(
            200,
            json!({
                "coins": {
                    "ethereum": {"price": 3500.0},
                    "usd-coin": {"price": 1.0}
                }
            }),
        )],
        Duration::ZERO,
    );
    let gateway = gateway_against(&fixture, |_| {});

    let prices = gateway
        .get_prices(&["ethereum".to_string(), "usd-coin".to_string()])
        .await
        .unwrap();

    assert_eq!(prices.len(), 2);
    assert_eq!(prices["ethereum"], json!({"price": 3500.0}));
    assert_eq!(prices["usd-coin"], json!({"price": 1.0}));
    // Two coins, one upstream call
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);

    let stats = gateway.get_stats().await;
    assert_eq!(stats.batcher.requests_batched, 2);
    assert_eq!(stats.batcher.batches_flushed, 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_stats_snapshot_serializes() {
    let fixture = spawn_fixture(vec![(200, pools_body())], Duration::ZERO);
    let gateway = gateway_against(&fixture, |_| {});

    gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();

    let snapshot = gateway.get_stats().await;
    let as_json = serde_json::to_value(&snapshot).unwrap();
    assert!(as_json["upstream"]["total_requests"].as_u64().unwrap() >= 1);
    assert!(as_json["cache"].is_object());
    assert!(as_json["coalescer"].is_object());
    assert!(as_json["limiter"].is_object());

    gateway.close().await;
}

#[tokio::test]
async fn test_stale_hit_returns_immediately_then_refreshes() {
    let old_body = json!({"status": "success", "data": [{"pool": "old"}]});
    let new_body = json!({"status": "success", "data": [{"pool": "new"}]});
    let fixture = spawn_fixture(vec![(200, old_body), (200, new_body)], Duration::ZERO);
    let gateway = gateway_against(&fixture, |config| {
        config.cache.pools_ttl_secs = 1;
        config.cache.pools_stale_ttl_secs = 60;
    });

    let first = gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();
    assert_eq!(first["data"][0]["pool"], "old");

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // Stale window: the old value comes back without waiting on the network
    let start = Instant::now();
    let stale = gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();
    assert_eq!(stale["data"][0]["pool"], "old");
    assert!(start.elapsed() < Duration::from_millis(50));

    // Background refresh lands shortly after
    tokio::time::sleep(Duration::from_millis(300)).await;
    let fresh = gateway
        .fetch("/pools", &Params::new(), CacheType::Pools)
        .await
        .unwrap();
    assert_eq!(fresh["data"][0]["pool"], "new");
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 2);

    let stats = gateway.get_stats().await;
    assert_eq!(stats.cache.stale_hits, 1);

    gateway.close().await;
}
