/// Subsystem tags for structured logging
///
/// Every log line carries the tag of the component that emitted it, so
/// operators can gate debug output per subsystem (YIELDGATE_DEBUG=cache,http).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogTag {
    Gateway,
    Cache,
    Coalescer,
    RateLimit,
    Batch,
    Http,
    Config,
}

impl LogTag {
    /// Fixed-width display name used in the console prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Gateway => "GATEWAY",
            LogTag::Cache => "CACHE",
            LogTag::Coalescer => "COALESCE",
            LogTag::RateLimit => "RATELIMIT",
            LogTag::Batch => "BATCH",
            LogTag::Http => "HTTP",
            LogTag::Config => "CONFIG",
        }
    }

    /// Lowercase key matched against YIELDGATE_DEBUG entries.
    pub fn debug_key(&self) -> &'static str {
        match self {
            LogTag::Gateway => "gateway",
            LogTag::Cache => "cache",
            LogTag::Coalescer => "coalescer",
            LogTag::RateLimit => "ratelimit",
            LogTag::Batch => "batch",
            LogTag::Http => "http",
            LogTag::Config => "config",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
