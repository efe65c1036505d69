//! Metric Layer
//!
//! Data model shared by every pipeline stage and the pure formatting step.
//!
//! - [`NormalizedMetric`]: Parser output, one per target per cycle
//! - [`format_metric`]: Layout-driven fan-out into [`Measurement`]s
//! - [`Measurement::to_line_protocol`]: Wire encoding for the store

pub mod format;
pub mod line_protocol;
mod types;

pub use format::{FormatError, TARGET_TAG, format_metric, speedtest_key};
pub use line_protocol::encode_batch;
pub use types::{
    FieldValue, Fields, FormattedRecord, Measurement, NormalizedMetric, ProbeFamily, Tags, Target,
};
