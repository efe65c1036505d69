//! Core probe traits and types.

use chrono::Utc;
use thiserror::Error;

use crate::metric::{NormalizedMetric, ProbeFamily, Target};

/// Unparsed outcome of one probe invocation against one target.
///
/// Probe failures are values, not errors: a runner never fails past its
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawProbeResult {
    /// The tool ran and produced output worth parsing.
    Success { output: String },
    /// The tool reported total loss for the target.
    Unreachable { output: String },
    /// The tool exited abnormally or timed out.
    ToolError { code: Option<i32>, stderr: String },
    /// The tool could not be started.
    LaunchError { reason: String },
}

impl RawProbeResult {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Unreachable { .. } => "unreachable",
            Self::ToolError { .. } => "tool-error",
            Self::LaunchError { .. } => "launch-error",
        }
    }
}

/// Errors produced when probe output cannot be turned into a metric.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The output reports that no probe packet came back.
    #[error("target reported 100% packet loss")]
    TotalLoss,

    /// The output does not follow the tool's known grammar.
    #[error("unrecognized {family} output: {reason}")]
    Grammar { family: ProbeFamily, reason: String },

    /// The output is not valid JSON or a field has the wrong type.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// The timestamp could not be interpreted.
    #[error("invalid timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },
}

/// Core probe trait: one external diagnostic tool plus its output grammar.
///
/// `run` and `parse` are separate so the pipeline can log and count each
/// stage on its own.
#[async_trait::async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Family of metrics this probe produces.
    fn family(&self) -> ProbeFamily;

    /// Invoke the tool against `target` and capture its output.
    async fn run(&self, target: &Target) -> RawProbeResult;

    /// Turn successful tool output into a normalized metric.
    ///
    /// May perform best-effort lookups (e.g. name resolution) whose failure
    /// degrades fields rather than failing the parse.
    async fn parse(&self, target: &Target, output: &str) -> Result<NormalizedMetric, ParseError>;
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_result_kind() {
        assert_eq!(
            RawProbeResult::Success {
                output: String::new()
            }
            .kind(),
            "success"
        );
        assert_eq!(
            RawProbeResult::LaunchError {
                reason: "no such file".into()
            }
            .kind(),
            "launch-error"
        );
    }

    #[test]
    fn test_now_ns_is_non_decreasing() {
        let first = now_ns();
        let second = now_ns();
        assert!(first > 1_600_000_000_000_000_000);
        assert!(second >= first);
    }
}
