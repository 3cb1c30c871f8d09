/// Configuration loading and access
///
/// Configuration is read once at startup and handed to `ApiGateway::new` by
/// value; there is no hot reload and no global config cell.
use crate::errors::{GatewayError, GatewayResult};
use crate::logger::{self, LogTag};

pub mod macros;
pub mod schemas;

pub use schemas::{
    BatcherConfig, CacheConfig, CoalescerConfig, EndpointOverride, GatewayConfig, HttpConfig,
    RateTierConfig,
};

impl GatewayConfig {
    /// Parse a TOML config file. Sections and fields that are absent fall
    /// back to their defaults.
    pub fn load_from_path(path: &str) -> GatewayResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str::<GatewayConfig>(&contents)
            .map_err(|e| GatewayError::Config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Load from a path if it exists, otherwise log and use defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load_from_path(path) {
            Ok(config) => {
                logger::info(LogTag::Config, &format!("Loaded configuration from {}", path));
                config
            }
            Err(e) => {
                logger::warning(
                    LogTag::Config,
                    &format!("{} - using built-in defaults", e),
                );
                Self::default()
            }
        }
    }

    /// Sanity-check values that would otherwise fail deep inside a component.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.http.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "http.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.http.max_retries == 0 {
            return Err(GatewayError::Config(
                "http.max_retries must be greater than zero".to_string(),
            ));
        }
        if self.http.backoff_factor < 1.0 {
            return Err(GatewayError::Config(
                "http.backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(GatewayError::Config(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }
        for (name, max, rate) in [
            ("high", self.tiers.high_max_tokens, self.tiers.high_refill_per_sec),
            ("medium", self.tiers.medium_max_tokens, self.tiers.medium_refill_per_sec),
            ("low", self.tiers.low_max_tokens, self.tiers.low_refill_per_sec),
        ] {
            if max < 1.0 || rate <= 0.0 {
                return Err(GatewayError::Config(format!(
                    "tiers.{}: max_tokens must be >= 1 and refill_per_sec > 0",
                    name
                )));
            }
        }
        if self.batcher.max_batch_size == 0 {
            return Err(GatewayError::Config(
                "batcher.max_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
