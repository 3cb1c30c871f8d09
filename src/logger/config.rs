/// Logger configuration and filtering rules
///
/// The config is a process-wide cell initialized once at startup. Filtering:
/// errors always pass, everything else is checked against the minimum level,
/// and debug lines additionally require their tag to be enabled.
use super::tags::LogTag;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" | "WARNING" => Some(LogLevel::Warning),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level that gets printed (default Info).
    pub min_level: LogLevel,
    /// Tags with debug output enabled ("all" enables every tag).
    pub debug_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
        }
    }
}

impl LoggerConfig {
    /// Build from environment: YIELDGATE_LOG sets the minimum level,
    /// YIELDGATE_DEBUG is a comma list of tag keys (or "all").
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("YIELDGATE_LOG") {
            if let Some(parsed) = LogLevel::parse(&level) {
                config.min_level = parsed;
            }
        }

        if let Ok(tags) = std::env::var("YIELDGATE_DEBUG") {
            for tag in tags.split(',') {
                let tag = tag.trim().to_ascii_lowercase();
                if !tag.is_empty() {
                    config.debug_tags.insert(tag);
                }
            }
            if !config.debug_tags.is_empty() && config.min_level < LogLevel::Debug {
                config.min_level = LogLevel::Debug;
            }
        }

        config
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Whether a message at `level` for `tag` should reach the console.
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    if level == LogLevel::Error {
        return true;
    }

    let config = LOGGER_CONFIG.read();
    if level > config.min_level {
        return false;
    }

    if level == LogLevel::Debug {
        return config.debug_tags.contains("all") || config.debug_tags.contains(tag.debug_key());
    }

    true
}
