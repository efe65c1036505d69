//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metric::{Tags, Target};
use crate::orchestrator::CycleSettings;
use crate::probe::{PingConfig, SpeedtestConfig};
use crate::store::StoreConfig;

use super::targets::{load_targets, merge_targets};
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Config file read when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "configs/netpulse.yaml";

/// Default collection interval (60 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default sleep after a cycle in which every target failed (30 seconds).
pub const DEFAULT_FAIL_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay between store connection or write attempts (30 seconds).
pub const DEFAULT_DB_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default concurrent pipelines per cycle.
pub const DEFAULT_WORKERS: usize = 5;

/// Default write attempts per record.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Default delay before a crashed cycle loop is restarted (30 seconds).
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(30);

/// Speedtest collection interval unless overridden (10 minutes).
pub const SPEEDTEST_INTERVAL: Duration = Duration::from_secs(600);

/// Speedtest failed-cycle interval unless overridden (1 minute).
pub const SPEEDTEST_FAIL_INTERVAL: Duration = Duration::from_secs(60);

/// Bandwidth tests saturate the link, so they run one at a time by default.
pub const SPEEDTEST_WORKERS: usize = 1;

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_fail_interval() -> Duration {
    DEFAULT_FAIL_INTERVAL
}

fn default_db_retry_interval() -> Duration {
    DEFAULT_DB_RETRY_INTERVAL
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_write_attempts() -> u32 {
    DEFAULT_WRITE_ATTEMPTS
}

fn default_restart_delay() -> Duration {
    DEFAULT_RESTART_DELAY
}

// =============================================================================
// Collection Configuration
// =============================================================================

/// Cycle timing, concurrency and retry settings shared by all families.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Sleep between cycles (default: 60s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Sleep after a cycle where every target failed (default: 30s).
    #[serde(default = "default_fail_interval", with = "humantime_serde")]
    pub fail_interval: Duration,

    /// Delay between store connection and write attempts (default: 30s).
    #[serde(default = "default_db_retry_interval", with = "humantime_serde")]
    pub db_retry_interval: Duration,

    /// Concurrent pipelines per cycle (default: 5).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Write attempts per record (default: 3).
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Delay before restarting a crashed cycle loop (default: 30s).
    #[serde(default = "default_restart_delay", with = "humantime_serde")]
    pub restart_delay: Duration,

    /// Log every written record.
    #[serde(default)]
    pub verbose: bool,

    /// Static tags added to every measurement.
    #[serde(default)]
    pub tags: Tags,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fail_interval: DEFAULT_FAIL_INTERVAL,
            db_retry_interval: DEFAULT_DB_RETRY_INTERVAL,
            workers: DEFAULT_WORKERS,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            restart_delay: DEFAULT_RESTART_DELAY,
            verbose: false,
            tags: Tags::new(),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
///
/// Every section and field is optional in YAML; absent values take their
/// documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ping: PingConfig,

    #[serde(default)]
    pub speedtest: SpeedtestConfig,
}

/// Store settings supplied outside the config file (CLI flags or
/// `INFLUX_*` environment variables). Present values win.
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    pub host: Option<String>,
    pub token: Option<String>,
    pub org: Option<String>,
    pub bucket: Option<String>,
}

impl AppConfig {
    /// Load, expand and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        let mut config = Self::default();
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse, expand and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty or comment-only document is null, not an empty mapping.
        let mut config: Self = match serde_yaml::from_str(content)? {
            serde_yaml::Value::Null => Self::default(),
            value => serde_yaml::from_value(value)?,
        };
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `${VAR}` expansion to store settings and family buckets.
    fn expand_env(&mut self) {
        let store = &mut self.store;
        for value in [
            &mut store.host,
            &mut store.token,
            &mut store.org,
            &mut store.bucket,
        ] {
            *value = expand_env_vars(value);
        }
        for bucket in [&mut self.ping.bucket, &mut self.speedtest.bucket]
            .into_iter()
            .flatten()
        {
            *bucket = expand_env_vars(bucket);
        }
    }

    /// Apply out-of-file store settings, then re-validate.
    pub fn apply_store_overrides(&mut self, overrides: StoreOverrides) -> Result<(), ConfigError> {
        let StoreOverrides {
            host,
            token,
            org,
            bucket,
        } = overrides;
        let store = &mut self.store;
        for (slot, value) in [
            (&mut store.host, host),
            (&mut store.token, token),
            (&mut store.org, org),
            (&mut store.bucket, bucket),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
        self.validate()
    }

    /// Check every value the collector cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collection;
        if c.workers == 0 {
            return Err(ConfigError::invalid("collection workers must be positive"));
        }
        if c.write_attempts == 0 {
            return Err(ConfigError::invalid(
                "collection write_attempts must be positive",
            ));
        }
        for (name, value) in [
            ("collection interval", c.interval),
            ("collection fail_interval", c.fail_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(format!("{name} must be non-zero")));
            }
        }

        for (name, bucket) in [
            ("store bucket", Some(&self.store.bucket)),
            ("ping bucket", self.ping.bucket.as_ref()),
            ("speedtest bucket", self.speedtest.bucket.as_ref()),
        ] {
            if bucket.is_some_and(|b| b.trim().is_empty()) {
                return Err(ConfigError::invalid(format!("{name} must not be empty")));
            }
        }
        self.store
            .base_url()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;

        if self.ping.enabled {
            if self.ping.count == 0 {
                return Err(ConfigError::invalid("ping count must be positive"));
            }
            if self.ping.binary.trim().is_empty() {
                return Err(ConfigError::invalid("ping binary must not be empty"));
            }
        }

        if self.speedtest.enabled {
            if self.speedtest.workers == Some(0) {
                return Err(ConfigError::invalid("speedtest workers must be positive"));
            }
            if self.speedtest.binary.trim().is_empty() {
                return Err(ConfigError::invalid("speedtest binary must not be empty"));
            }
        }

        for (name, value) in [
            ("ping interval", self.ping.interval),
            ("ping fail_interval", self.ping.fail_interval),
            ("speedtest interval", self.speedtest.interval),
            ("speedtest fail_interval", self.speedtest.fail_interval),
        ] {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::invalid(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }

    fn base_settings(&self) -> CycleSettings {
        let c = &self.collection;
        CycleSettings {
            interval: c.interval,
            fail_interval: c.fail_interval,
            db_retry_interval: c.db_retry_interval,
            workers: c.workers,
            write_attempts: c.write_attempts,
            verbose: c.verbose,
            tags: c.tags.clone(),
        }
    }

    /// Cycle settings for the ping family.
    pub fn ping_settings(&self) -> CycleSettings {
        let mut settings = self.base_settings();
        if let Some(interval) = self.ping.interval {
            settings.interval = interval;
        }
        if let Some(fail_interval) = self.ping.fail_interval {
            settings.fail_interval = fail_interval;
        }
        settings
    }

    /// Cycle settings for the speedtest family.
    pub fn speedtest_settings(&self) -> CycleSettings {
        CycleSettings {
            interval: self.speedtest.interval.unwrap_or(SPEEDTEST_INTERVAL),
            fail_interval: self
                .speedtest
                .fail_interval
                .unwrap_or(SPEEDTEST_FAIL_INTERVAL),
            workers: self.speedtest.workers.unwrap_or(SPEEDTEST_WORKERS),
            ..self.base_settings()
        }
    }

    /// Store settings for the ping family.
    pub fn ping_store(&self) -> StoreConfig {
        self.store_with_bucket(self.ping.bucket.as_deref())
    }

    /// Store settings for the speedtest family.
    pub fn speedtest_store(&self) -> StoreConfig {
        self.store_with_bucket(self.speedtest.bucket.as_deref())
    }

    fn store_with_bucket(&self, bucket: Option<&str>) -> StoreConfig {
        let mut store = self.store.clone();
        if let Some(bucket) = bucket {
            store.bucket = bucket.to_string();
        }
        store
    }

    /// Resolve the ping target list from the targets file and inline targets.
    ///
    /// A missing file is tolerated when inline targets exist.
    pub fn ping_targets(&self) -> Result<Vec<Target>, ConfigError> {
        let inline: Vec<Target> = self.ping.targets.iter().map(Target::new).collect();

        let from_file = match &self.ping.targets_file {
            Some(path) => match load_targets(path) {
                Ok(targets) => targets,
                Err(e) if !inline.is_empty() => {
                    tracing::warn!(error = %e, "Ignoring unreadable targets file");
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
            None => Vec::new(),
        };

        Ok(merge_targets([from_file, inline]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        assert!(AppConfig::from_yaml("# nothing configured\n").is_ok());
        let config = AppConfig::from_yaml("").unwrap();
        assert_eq!(config.collection.interval, DEFAULT_INTERVAL);
        assert_eq!(config.collection.fail_interval, DEFAULT_FAIL_INTERVAL);
        assert_eq!(config.collection.db_retry_interval, DEFAULT_DB_RETRY_INTERVAL);
        assert_eq!(config.collection.workers, 5);
        assert_eq!(config.collection.write_attempts, 3);
        assert!(!config.collection.verbose);
        assert_eq!(config.store.bucket, "netpulse");
        assert!(config.ping.enabled);
        assert_eq!(config.ping.count, 8);
        assert!(!config.speedtest.enabled);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
collection:
  interval: 2m
  fail_interval: 45s
  db_retry_interval: 5s
  workers: 10
  write_attempts: 5
  verbose: true
  tags:
    site: home
store:
  host: https://influx.example.com
  token: abc
  org: lab
  bucket: network
ping:
  count: 4
  targets_file: null
  targets: [1.1.1.1, example.com]
  interval: 30s
speedtest:
  enabled: true
  servers: [19302]
  timeout: 5m
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        let ping = config.ping_settings();
        assert_eq!(ping.interval, Duration::from_secs(30));
        assert_eq!(ping.fail_interval, Duration::from_secs(45));
        assert_eq!(ping.workers, 10);
        assert_eq!(ping.write_attempts, 5);
        assert!(ping.verbose);
        assert_eq!(ping.tags.get("site").map(String::as_str), Some("home"));

        let speedtest = config.speedtest_settings();
        assert_eq!(speedtest.interval, SPEEDTEST_INTERVAL);
        assert_eq!(speedtest.fail_interval, SPEEDTEST_FAIL_INTERVAL);
        assert_eq!(speedtest.workers, 1);
        assert_eq!(speedtest.db_retry_interval, Duration::from_secs(5));
        assert_eq!(config.speedtest.timeout, Some(Duration::from_secs(300)));

        let targets = config.ping_targets().unwrap();
        assert_eq!(targets, vec![Target::new("1.1.1.1"), Target::new("example.com")]);
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        let err = AppConfig::from_yaml("collection: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));

        let err = AppConfig::from_yaml("collection:\n  interval: forever\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for yaml in [
            "collection:\n  workers: 0\n",
            "collection:\n  write_attempts: 0\n",
            "collection:\n  interval: 0s\n",
            "ping:\n  count: 0\n",
            "store:\n  bucket: ''\n",
            "store:\n  host: 'not a url'\n",
            "speedtest:\n  enabled: true\n  workers: 0\n",
        ] {
            let err = AppConfig::from_yaml(yaml).unwrap_err();
            assert!(
                matches!(err, ConfigError::ValidationError(_)),
                "expected validation error for {yaml:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_family_buckets() {
        let config = AppConfig::from_yaml("speedtest:\n  enabled: true\n").unwrap();
        assert_eq!(config.ping_store().bucket, "netpulse");
        assert_eq!(config.speedtest_store().bucket, "netpulse");

        let config = AppConfig::from_yaml(
            "store:\n  org: lab\nping:\n  bucket: pingLatency\nspeedtest:\n  enabled: true\n  bucket: ${NETPULSE_TEST_UNSET_BUCKET_41:-speedtest}\n",
        )
        .unwrap();
        let ping = config.ping_store();
        let speedtest = config.speedtest_store();
        assert_eq!(ping.bucket, "pingLatency");
        assert_eq!(speedtest.bucket, "speedtest");
        assert_eq!(ping.org, "lab");
        assert_eq!(speedtest.org, "lab");
        assert_eq!(config.store.bucket, "netpulse");

        let err = AppConfig::from_yaml("ping:\n  bucket: ''\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_disabled_ping_skips_ping_checks() {
        assert!(AppConfig::from_yaml("ping:\n  enabled: false\n  count: 0\n").is_ok());
    }

    #[test]
    fn test_env_expansion_in_store() {
        let config = AppConfig::from_yaml(
            "store:\n  host: ${NETPULSE_TEST_UNSET_HOST_77:-http://influx:8086}\n",
        )
        .unwrap();
        assert_eq!(config.store.host, "http://influx:8086");
    }

    #[test]
    fn test_store_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_store_overrides(StoreOverrides {
                host: Some("http://10.0.0.5:8086".into()),
                token: Some("tok".into()),
                org: None,
                bucket: Some("pings".into()),
            })
            .unwrap();
        assert_eq!(config.store.host, "http://10.0.0.5:8086");
        assert_eq!(config.store.token, "tok");
        assert_eq!(config.store.org, "");
        assert_eq!(config.store.bucket, "pings");

        let err = config.apply_store_overrides(StoreOverrides {
            bucket: Some(" ".into()),
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.collection.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_load_file_and_targets_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("pinglist.txt");
        std::fs::write(&list, "# lan\n192.168.0.1\n8.8.8.8\n").unwrap();

        let path = dir.path().join("netpulse.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "ping:\n  targets_file: {}\n  targets: [8.8.8.8, 1.1.1.1]",
            list.display()
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        let targets = config.ping_targets().unwrap();
        assert_eq!(
            targets,
            vec![
                Target::new("192.168.0.1"),
                Target::new("8.8.8.8"),
                Target::new("1.1.1.1")
            ]
        );
    }

    #[test]
    fn test_missing_targets_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let mut config = AppConfig::default();
        config.ping.targets_file = Some(missing.display().to_string());

        assert!(matches!(
            config.ping_targets(),
            Err(ConfigError::IoError { .. })
        ));

        config.ping.targets = vec!["9.9.9.9".into()];
        assert_eq!(config.ping_targets().unwrap(), vec![Target::new("9.9.9.9")]);
    }
}
