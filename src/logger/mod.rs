//! Structured logging for the gateway
//!
//! Every subsystem logs through a tag so operators can raise verbosity per
//! component without flooding the console:
//!
//! ```text
//! YIELDGATE_LOG=debug YIELDGATE_DEBUG=cache,http ...
//! ```
//!
//! Usage:
//!
//! ```rust
//! use yieldgate::logger::{self, LogTag};
//!
//! logger::init();
//! logger::info(LogTag::Cache, "warmed 120 entries");
//! logger::debug(LogTag::Http, "GET /pools took 412ms");
//! ```

mod config;
mod format;
mod tags;

pub use config::{get_logger_config, set_logger_config, LogLevel, LoggerConfig};
pub use tags::LogTag;

/// Initialize the logger from the environment. Call once at startup; calling
/// again just re-reads the environment.
pub fn init() {
    config::set_logger_config(LoggerConfig::from_env());
}

fn log(tag: LogTag, level: LogLevel, message: &str) {
    if config::should_log(&tag, level) {
        format::format_and_log(&tag, level, message);
    }
}

pub fn error(tag: LogTag, message: &str) {
    log(tag, LogLevel::Error, message);
}

pub fn warning(tag: LogTag, message: &str) {
    log(tag, LogLevel::Warning, message);
}

pub fn info(tag: LogTag, message: &str) {
    log(tag, LogLevel::Info, message);
}

pub fn debug(tag: LogTag, message: &str) {
    log(tag, LogLevel::Debug, message);
}
