//! Configuration descriptor consumed by the core.
//!
//! Loading this struct from a file on disk is explicitly out of scope
//! (spec.md §1/§6): the core only ever consumes the already-parsed struct.
//! Field names and defaults are grounded on
//! `original_source/rocket/common/config.{h,cc}`.

use std::fmt;
use std::time::Duration;

/// Log level recognized by the configuration descriptor.
///
/// The core itself never acts on this value directly (it only emits
/// events through the `log` facade); it is surfaced for an application's
/// logging backend to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    /// Parses a config string, defaulting to `Debug` on anything
    /// unrecognized — matching `StringToLogLevel`'s `else return Debug`.
    pub fn from_str_or_default(s: &str) -> LogLevel {
        match s {
            "INFO" => LogLevel::Info,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// The configuration descriptor described in spec.md §6.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub log_level: LogLevel,
    pub log_file_name: String,
    pub log_file_path: String,
    pub log_max_file_size: u64,
    pub log_sync_interval: Duration,
    /// Number of I/O workers in the server's pool (spec.md §4.5, default 2).
    pub io_worker_count: usize,
    /// Default per-call timeout for an `rpc::Controller` (spec.md §4.7).
    pub default_call_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> RpcConfig {
        RpcConfig {
            log_level: LogLevel::Debug,
            log_file_name: "rrpc".to_string(),
            log_file_path: ".".to_string(),
            log_max_file_size: 1024 * 1024 * 100,
            log_sync_interval: Duration::from_millis(500),
            io_worker_count: 2,
            default_call_timeout: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_log_level_defaults_to_debug() {
        assert_eq!(LogLevel::from_str_or_default("WAT"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str_or_default("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from_str_or_default("ERROR"), LogLevel::Error);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.default_call_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.io_worker_count, 2);
    }
}
