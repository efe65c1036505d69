//! ICMP reachability probe driven by the system `ping` tool.
//!
//! Runs `ping -c <count> <target>`, extracts packet loss and the round-trip
//! summary line, and resolves the target's IPv4/IPv6 addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::metric::{NormalizedMetric, ProbeFamily, Target};
use crate::probe::runner::{ToolOutput, run_tool};
use crate::probe::traits::{ParseError, Probe, RawProbeResult, now_ns};

/// Default number of echo requests per probe.
pub const DEFAULT_COUNT: u32 = 8;

/// Packet loss reported when the tool prints no loss summary.
const DEFAULT_PACKET_LOSS: &str = "100";

fn default_enabled() -> bool {
    true
}

fn default_binary() -> String {
    "ping".to_string()
}

fn default_count() -> u32 {
    DEFAULT_COUNT
}

fn default_targets_file() -> Option<String> {
    Some("pinglist.txt".to_string())
}

/// Configuration for the ping probe family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    /// Enable this probe family (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tool to execute (default: "ping").
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Echo requests per probe (default: 8).
    #[serde(default = "default_count")]
    pub count: u32,
    /// Newline-delimited target list (default: "pinglist.txt").
    #[serde(default = "default_targets_file")]
    pub targets_file: Option<String>,
    /// Additional inline targets.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Extra arguments placed before the target.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Kill the tool after this long (default: never).
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Override of the collection interval for this family.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Override of the failed-cycle interval for this family.
    #[serde(default, with = "humantime_serde")]
    pub fail_interval: Option<Duration>,
    /// Bucket for ping records (default: the store bucket).
    #[serde(default)]
    pub bucket: Option<String>,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: default_binary(),
            count: DEFAULT_COUNT,
            targets_file: default_targets_file(),
            targets: Vec::new(),
            extra_args: Vec::new(),
            timeout: None,
            interval: None,
            fail_interval: None,
            bucket: None,
        }
    }
}

impl PingConfig {
    /// Set the tool binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments for one invocation against `target`.
    pub fn args_for(&self, target: &Target) -> Vec<String> {
        let mut args = vec!["-c".to_string(), self.count.to_string()];
        args.extend(self.extra_args.iter().cloned());
        args.push(target.to_string());
        args
    }
}

/// Packet loss and round-trip statistics extracted from ping output.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    /// Loss percentage as printed by the tool, e.g. `"0"` or `"12.5"`.
    pub packet_loss: String,
    pub latency_min: f64,
    pub latency_avg: f64,
    pub latency_max: f64,
}

/// Forward-resolved addresses of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAddrs {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

fn loss_regex() -> &'static Regex {
    static LOSS: OnceLock<Regex> = OnceLock::new();
    LOSS.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("failed to compile packet loss regex")
    })
}

fn rtt_regex() -> &'static Regex {
    // iputils: `rtt min/avg/max/mdev = 10.000/12.500/15.000/1.200 ms`
    // BSD/macOS: `round-trip min/avg/max/stddev = 10.000/12.500/15.000/1.200 ms`
    // busybox: `round-trip min/avg/max = 10.000/12.500/15.000 ms`
    static RTT: OnceLock<Regex> = OnceLock::new();
    RTT.get_or_init(|| {
        Regex::new(
            r"min/avg/max(?:/(?:mdev|stddev))?\s*=\s*(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)(?:/\d+(?:\.\d+)?)?\s*ms",
        )
        .expect("failed to compile rtt regex")
    })
}

/// Packet loss percentage printed by the tool, if any.
fn packet_loss(output: &str) -> Option<&str> {
    loss_regex()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether the output reports that every echo request was lost.
pub fn reports_total_loss(output: &str) -> bool {
    packet_loss(output)
        .and_then(|loss| loss.parse::<f64>().ok())
        .is_some_and(|loss| loss >= 100.0)
}

/// Parse line-oriented ping output.
///
/// A missing loss summary is reported as `"100"` rather than an error; a
/// missing round-trip summary is a grammar error.
pub fn parse_ping_output(output: &str) -> Result<PingStats, ParseError> {
    if reports_total_loss(output) {
        return Err(ParseError::TotalLoss);
    }

    let packet_loss = packet_loss(output).unwrap_or(DEFAULT_PACKET_LOSS).to_string();

    let caps = rtt_regex()
        .captures(output)
        .ok_or_else(|| ParseError::Grammar {
            family: ProbeFamily::Ping,
            reason: "no round-trip summary line".to_string(),
        })?;

    let value = |idx: usize| -> Result<f64, ParseError> {
        caps[idx].parse::<f64>().map_err(|e| ParseError::Grammar {
            family: ProbeFamily::Ping,
            reason: format!("invalid round-trip value '{}': {e}", &caps[idx]),
        })
    };

    Ok(PingStats {
        packet_loss,
        latency_min: value(1)?,
        latency_avg: value(2)?,
        latency_max: value(3)?,
    })
}

/// Resolve the first IPv4 and IPv6 address of `host`.
///
/// Lookup failures are logged and yield empty results.
pub async fn resolve_addresses(host: &str) -> ResolvedAddrs {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => ResolvedAddrs {
                ipv4: Some(v4),
                ipv6: None,
            },
            IpAddr::V6(v6) => ResolvedAddrs {
                ipv4: None,
                ipv6: Some(v6),
            },
        };
    }

    let addrs = match tokio::net::lookup_host(format!("{host}:0")).await {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!(host, error = %e, "Address lookup failed");
            return ResolvedAddrs::default();
        }
    };

    let mut resolved = ResolvedAddrs::default();
    for addr in addrs {
        match addr.ip() {
            IpAddr::V4(v4) if resolved.ipv4.is_none() => resolved.ipv4 = Some(v4),
            IpAddr::V6(v6) if resolved.ipv6.is_none() => resolved.ipv6 = Some(v6),
            _ => {}
        }
    }
    resolved
}

/// Build the normalized ping metric from parsed statistics.
pub fn normalize(
    target: &Target,
    stats: PingStats,
    addrs: &ResolvedAddrs,
    timestamp_ns: i64,
) -> NormalizedMetric {
    NormalizedMetric::new(ProbeFamily::Ping, target.clone(), timestamp_ns)
        .with_field("host", target.as_str())
        .with_field("packet_loss", stats.packet_loss)
        .with_field("latency_avg", stats.latency_avg)
        .with_field("latency_min", stats.latency_min)
        .with_field("latency_max", stats.latency_max)
        .with_field(
            "ipv4_address",
            addrs.ipv4.map(|a| a.to_string()).unwrap_or_default(),
        )
        .with_field(
            "ipv6_address",
            addrs.ipv6.map(|a| a.to_string()).unwrap_or_default(),
        )
        .with_field("target_hostname", target.as_str())
}

/// Map the tool's exit status and output to a probe result.
///
/// Total loss wins over the exit code because `ping` exits non-zero when no
/// reply arrives.
pub fn classify(output: ToolOutput) -> RawProbeResult {
    match output {
        ToolOutput::Exited { stdout, .. } if reports_total_loss(&stdout) => {
            RawProbeResult::Unreachable { output: stdout }
        }
        ToolOutput::Exited {
            code: Some(0),
            stdout,
            ..
        } => RawProbeResult::Success { output: stdout },
        ToolOutput::Exited {
            code,
            stdout,
            stderr,
        } => RawProbeResult::ToolError {
            code,
            stderr: if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            },
        },
        ToolOutput::TimedOut => RawProbeResult::ToolError {
            code: None,
            stderr: "timed out".to_string(),
        },
        ToolOutput::LaunchFailed(reason) => RawProbeResult::LaunchError { reason },
    }
}

/// Reachability probe using the system `ping` tool.
#[derive(Debug, Clone)]
pub struct PingProbe {
    config: PingConfig,
}

impl PingProbe {
    /// Create a new ping probe.
    pub fn new(config: PingConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Probe for PingProbe {
    fn family(&self) -> ProbeFamily {
        ProbeFamily::Ping
    }

    async fn run(&self, target: &Target) -> RawProbeResult {
        let args = self.config.args_for(target);
        classify(run_tool(&self.config.binary, &args, self.config.timeout).await)
    }

    async fn parse(&self, target: &Target, output: &str) -> Result<NormalizedMetric, ParseError> {
        let stats = parse_ping_output(output)?;
        let timestamp_ns = now_ns();
        let addrs = resolve_addresses(target.as_str()).await;
        Ok(normalize(target, stats, &addrs, timestamp_ns))
    }
}
