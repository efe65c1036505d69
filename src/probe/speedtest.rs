//! Bandwidth probe driven by the Ookla `speedtest` CLI.
//!
//! Runs `speedtest --accept-license --accept-gdpr -f json [-s <server>]` and
//! projects the JSON report onto a fixed, typed schema.

use std::time::Duration;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::metric::{NormalizedMetric, ProbeFamily, Target, speedtest_key};
use crate::probe::runner::{ToolOutput, run_tool};
use crate::probe::traits::{ParseError, Probe, RawProbeResult};

/// Bytes per second in one megabit per second.
pub const BYTES_PER_MEGABIT: f64 = 125_000.0;

/// Target label used when the tool picks the server itself.
pub const AUTO_SERVER: &str = "auto";

fn default_binary() -> String {
    "speedtest".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--accept-license".to_string(), "--accept-gdpr".to_string()]
}

/// Configuration for the speedtest probe family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedtestConfig {
    /// Enable this probe family (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Tool to execute (default: "speedtest").
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Server IDs to test against; empty lets the tool choose.
    #[serde(default)]
    pub servers: Vec<u32>,
    /// Arguments preceding the output format flags.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Kill the tool after this long (default: never).
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Override of the collection interval for this family (default: 10m).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Override of the failed-cycle interval for this family (default: 1m).
    #[serde(default, with = "humantime_serde")]
    pub fail_interval: Option<Duration>,
    /// Concurrent tests (default: 1).
    #[serde(default)]
    pub workers: Option<usize>,
    /// Bucket for speedtest records (default: the store bucket).
    #[serde(default)]
    pub bucket: Option<String>,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: default_binary(),
            servers: Vec::new(),
            args: default_args(),
            timeout: None,
            interval: None,
            fail_interval: None,
            workers: None,
            bucket: None,
        }
    }
}

impl SpeedtestConfig {
    /// One target per configured server, or the automatic selection.
    pub fn targets(&self) -> Vec<Target> {
        if self.servers.is_empty() {
            vec![Target::new(AUTO_SERVER)]
        } else {
            self.servers
                .iter()
                .map(|id| Target::new(id.to_string()))
                .collect()
        }
    }

    /// Arguments for one invocation against `target`.
    pub fn args_for(&self, target: &Target) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(["-f".to_string(), "json".to_string()]);
        if target.as_str() != AUTO_SERVER {
            args.extend(["-s".to_string(), target.to_string()]);
        }
        args
    }
}

// =============================================================================
// Report schema
// =============================================================================

/// Speedtest JSON report.
///
/// `timestamp` is required; every other key defaults to zero, empty or false
/// when absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpeedtestReport {
    pub timestamp: Option<String>,
    pub ping: PingSection,
    pub download: TransferSection,
    pub upload: TransferSection,
    pub packet_loss: f64,
    pub isp: String,
    pub interface: InterfaceSection,
    pub server: ServerSection,
    pub result: ResultSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PingSection {
    pub jitter: f64,
    pub latency: f64,
    pub low: f64,
    pub high: f64,
}

/// Download or upload phase.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Bytes per second.
    pub bandwidth: f64,
    pub bytes: i64,
    /// Milliseconds.
    pub elapsed: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterfaceSection {
    pub internal_ip: String,
    pub external_ip: String,
    pub name: String,
    pub is_vpn: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub id: i64,
    pub host: String,
    pub port: i64,
    pub name: String,
    pub location: String,
    pub country: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultSection {
    pub url: String,
}

impl SpeedtestReport {
    /// Parse a report from the tool's JSON output.
    pub fn from_json(output: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(output.trim())?)
    }

    /// Report time in nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> Result<i64, ParseError> {
        let raw = self
            .timestamp
            .as_deref()
            .filter(|ts| !ts.is_empty())
            .ok_or(ParseError::MissingField("timestamp"))?;

        let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| ParseError::Timestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })?;

        parsed
            .timestamp_nanos_opt()
            .ok_or_else(|| ParseError::Timestamp {
                value: raw.to_string(),
                reason: "out of range".to_string(),
            })
    }

    /// Build the normalized metric, converting bandwidth to Mbit/s.
    pub fn normalize(&self, target: &Target) -> Result<NormalizedMetric, ParseError> {
        let timestamp_ns = self.timestamp_ns()?;
        let key = speedtest_key;

        Ok(
            NormalizedMetric::new(ProbeFamily::Speedtest, target.clone(), timestamp_ns)
                .with_field(key("ping", "jitter"), self.ping.jitter)
                .with_field(key("ping", "latency"), self.ping.latency)
                .with_field(key("ping", "low"), self.ping.low)
                .with_field(key("ping", "high"), self.ping.high)
                .with_field(
                    key("download", "bandwidth"),
                    self.download.bandwidth / BYTES_PER_MEGABIT,
                )
                .with_field(key("download", "bytes"), self.download.bytes)
                .with_field(key("download", "elapsed"), self.download.elapsed)
                .with_field(
                    key("upload", "bandwidth"),
                    self.upload.bandwidth / BYTES_PER_MEGABIT,
                )
                .with_field(key("upload", "bytes"), self.upload.bytes)
                .with_field(key("upload", "elapsed"), self.upload.elapsed)
                .with_field(key("packet_loss", "packet_loss"), self.packet_loss)
                .with_field(key("isp", "isp"), self.isp.as_str())
                .with_field(
                    key("interface", "internal_ip"),
                    self.interface.internal_ip.as_str(),
                )
                .with_field(
                    key("interface", "external_ip"),
                    self.interface.external_ip.as_str(),
                )
                .with_field(key("interface", "name"), self.interface.name.as_str())
                .with_field(key("interface", "is_vpn"), self.interface.is_vpn)
                .with_field(key("server", "id"), self.server.id)
                .with_field(key("server", "host"), self.server.host.as_str())
                .with_field(key("server", "port"), self.server.port)
                .with_field(key("server", "name"), self.server.name.as_str())
                .with_field(key("server", "location"), self.server.location.as_str())
                .with_field(key("server", "country"), self.server.country.as_str())
                .with_field(key("server", "ip"), self.server.ip.as_str())
                .with_field(key("result", "url"), self.result.url.as_str()),
        )
    }
}

/// Map the tool's exit status to a probe result.
pub fn classify(output: ToolOutput) -> RawProbeResult {
    match output {
        ToolOutput::Exited {
            code: Some(0),
            stdout,
            ..
        } => RawProbeResult::Success { output: stdout },
        ToolOutput::Exited { code, stderr, .. } => RawProbeResult::ToolError { code, stderr },
        ToolOutput::TimedOut => RawProbeResult::ToolError {
            code: None,
            stderr: "timed out".to_string(),
        },
        ToolOutput::LaunchFailed(reason) => RawProbeResult::LaunchError { reason },
    }
}

/// Bandwidth probe using the Ookla `speedtest` CLI.
#[derive(Debug, Clone)]
pub struct SpeedtestProbe {
    config: SpeedtestConfig,
}

impl SpeedtestProbe {
    /// Create a new speedtest probe.
    pub fn new(config: SpeedtestConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Probe for SpeedtestProbe {
    fn family(&self) -> ProbeFamily {
        ProbeFamily::Speedtest
    }

    async fn run(&self, target: &Target) -> RawProbeResult {
        let args = self.config.args_for(target);
        classify(run_tool(&self.config.binary, &args, self.config.timeout).await)
    }

    async fn parse(&self, target: &Target, output: &str) -> Result<NormalizedMetric, ParseError> {
        SpeedtestReport::from_json(output)?.normalize(target)
    }
}
