//! Core data types flowing through the collection pipeline.
//!
//! - [`Target`]: Host or address a probe is pointed at
//! - [`NormalizedMetric`]: Parsed probe result with a typed field map
//! - [`Measurement`] / [`FormattedRecord`]: Store-ready write schema

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::metric::line_protocol::encode_batch;

/// Static tags attached to every measurement.
pub type Tags = BTreeMap<String, String>;

/// Field map of a normalized metric or measurement, ordered by key.
pub type Fields = BTreeMap<String, FieldValue>;

/// A network host or address to probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Create a target from a hostname or address, trimming surrounding whitespace.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_string())
    }

    /// The target identifier as given in the target list.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Probe family, which decides the tool, the parser and the measurement layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProbeFamily {
    /// ICMP reachability and latency via the system `ping` tool.
    Ping,
    /// Bandwidth via the Ookla `speedtest` CLI.
    Speedtest,
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// A parsed probe result.
///
/// Created once per target per cycle by a probe's parser and never modified
/// afterwards. Field names are family-specific; the formatter knows the layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMetric {
    /// Family that produced this metric.
    pub family: ProbeFamily,
    /// Target the probe ran against.
    pub target: Target,
    /// Observation time, nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
    /// Typed metric values keyed by name.
    pub fields: Fields,
}

impl NormalizedMetric {
    /// Create an empty metric for a target.
    pub fn new(family: ProbeFamily, target: Target, timestamp_ns: i64) -> Self {
        Self {
            family,
            target,
            timestamp_ns,
            fields: Fields::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// One named group of fields at a point in time, as understood by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub timestamp_ns: i64,
    pub tags: Tags,
    pub fields: Fields,
}

impl Measurement {
    /// An empty measurement with no tags or fields.
    pub fn new(name: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            name: name.into(),
            timestamp_ns,
            tags: Tags::new(),
            fields: Fields::new(),
        }
    }
}

/// All measurements derived from a single [`NormalizedMetric`].
///
/// Every measurement shares the source metric's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedRecord {
    pub target: Target,
    pub timestamp_ns: i64,
    pub measurements: Vec<Measurement>,
}

impl FormattedRecord {
    /// Number of measurements in this record.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Whether this record carries no measurements.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Encode all measurements as newline-separated line protocol.
    pub fn to_line_protocol(&self) -> String {
        encode_batch(&self.measurements)
    }
}
