//! yieldgate - caching gateway in front of a rate-limited DeFi yield-data API
//!
//! The data-access layer for an aggregation backend: a stale-while-revalidate
//! cache, an in-flight request coalescer, a token-bucket rate limiter with
//! queuing, an optional request batcher, and the gateway that chains them
//! with retrying HTTP fetches.
//!
//! ```no_run
//! use yieldgate::{ApiGateway, CacheType, GatewayConfig, Params};
//!
//! # async fn run() -> yieldgate::GatewayResult<()> {
//! yieldgate::logger::init();
//! let gateway = ApiGateway::new(GatewayConfig::default())?;
//!
//! let mut params = Params::new();
//! params.insert("chain".to_string(), "Base".to_string());
//! let pools = gateway.fetch("/pools", &params, CacheType::Pools).await?;
//!
//! gateway.close().await;
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod cache;
pub mod coalescer;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod limiter;
pub mod logger;
pub mod stats;

pub use batcher::{Params, RequestBatcher};
pub use cache::{ApiCache, CacheType, Freshness};
pub use coalescer::RequestCoalescer;
pub use config::GatewayConfig;
pub use errors::{GatewayError, GatewayResult};
pub use gateway::{ApiGateway, GatewayStatsSnapshot};
pub use limiter::{RateLimiter, RateTier};
