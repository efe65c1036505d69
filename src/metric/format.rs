//! Mapping from normalized metrics to store measurements.
//!
//! Formatting is a pure function of the metric and the static tags: the same
//! input always yields the same measurements in the same order.

use thiserror::Error;

use crate::metric::types::{
    Fields, FormattedRecord, Measurement, NormalizedMetric, ProbeFamily, Tags,
};

/// Tag key carrying the probed target on every measurement.
pub const TARGET_TAG: &str = "target";

/// Errors raised when a normalized metric does not satisfy its family layout.
///
/// These indicate a parser bug rather than a runtime condition and are never
/// retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// A field the layout requires is absent from the metric.
    #[error("{family} metric for '{target}' is missing required field '{field}'")]
    MissingField {
        family: ProbeFamily,
        target: String,
        field: String,
    },
}

/// One measurement of a family layout.
struct MeasurementLayout {
    name: &'static str,
    fields: &'static [&'static str],
}

/// Reachability probes write one flat measurement; normalized keys are the field names.
const PING_LAYOUT: &[MeasurementLayout] = &[MeasurementLayout {
    name: "ping",
    fields: &[
        "host",
        "packet_loss",
        "latency_avg",
        "latency_min",
        "latency_max",
        "ipv4_address",
        "ipv6_address",
        "target_hostname",
    ],
}];

/// Bandwidth probes fan out per facet; normalized keys are `<measurement>.<field>`.
const SPEEDTEST_LAYOUT: &[MeasurementLayout] = &[
    MeasurementLayout {
        name: "ping",
        fields: &["jitter", "latency", "low", "high"],
    },
    MeasurementLayout {
        name: "download",
        fields: &["bandwidth", "bytes", "elapsed"],
    },
    MeasurementLayout {
        name: "upload",
        fields: &["bandwidth", "bytes", "elapsed"],
    },
    MeasurementLayout {
        name: "packet_loss",
        fields: &["packet_loss"],
    },
    MeasurementLayout {
        name: "isp",
        fields: &["isp"],
    },
    MeasurementLayout {
        name: "interface",
        fields: &["internal_ip", "external_ip", "name", "is_vpn"],
    },
    MeasurementLayout {
        name: "server",
        fields: &["id", "host", "port", "name", "location", "country", "ip"],
    },
    MeasurementLayout {
        name: "result",
        fields: &["url"],
    },
];

/// Normalized field key for a speedtest facet field.
pub fn speedtest_key(measurement: &str, field: &str) -> String {
    format!("{measurement}.{field}")
}

/// Format a normalized metric into its ordered measurement set.
///
/// Every measurement carries the metric's timestamp, a `target` tag and the
/// given static tags. A static tag named `target` is overridden.
pub fn format_metric(
    metric: &NormalizedMetric,
    static_tags: &Tags,
) -> Result<FormattedRecord, FormatError> {
    let (layout, prefixed) = match metric.family {
        ProbeFamily::Ping => (PING_LAYOUT, false),
        ProbeFamily::Speedtest => (SPEEDTEST_LAYOUT, true),
    };

    let mut tags = static_tags.clone();
    tags.insert(TARGET_TAG.to_string(), metric.target.to_string());

    let measurements = layout
        .iter()
        .map(|m| -> Result<Measurement, FormatError> {
            let mut fields = Fields::new();
            for &field in m.fields {
                let key = if prefixed {
                    speedtest_key(m.name, field)
                } else {
                    field.to_string()
                };
                let value = metric
                    .field(&key)
                    .ok_or_else(|| FormatError::MissingField {
                        family: metric.family,
                        target: metric.target.to_string(),
                        field: key.clone(),
                    })?;
                fields.insert(field.to_string(), value.clone());
            }
            Ok(Measurement {
                name: m.name.to_string(),
                timestamp_ns: metric.timestamp_ns,
                tags: tags.clone(),
                fields,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FormattedRecord {
        target: metric.target.clone(),
        timestamp_ns: metric.timestamp_ns,
        measurements,
    })
}
