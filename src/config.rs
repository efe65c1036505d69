//! Configuration module for netpulse.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Collection settings (intervals, workers, write retries, static tags)
//! - Store settings (InfluxDB host, token, org, bucket)
//! - Probe families (`ping`, `speedtest`)
//! - Target lists (newline-delimited files plus inline targets)

mod app;
mod targets;
mod validation;

pub use app::{
    AppConfig, CollectionConfig, DEFAULT_CONFIG_PATH, DEFAULT_DB_RETRY_INTERVAL,
    DEFAULT_FAIL_INTERVAL, DEFAULT_INTERVAL, DEFAULT_RESTART_DELAY, DEFAULT_WORKERS,
    DEFAULT_WRITE_ATTEMPTS, SPEEDTEST_FAIL_INTERVAL, SPEEDTEST_INTERVAL, SPEEDTEST_WORKERS,
    StoreOverrides,
};
pub use targets::{load_targets, merge_targets, parse_targets};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
