//! One target's Probe → Parse → Format → Write pass.

use thiserror::Error;

use crate::logging::snippet;
use crate::metric::{FormatError, Tags, Target, format_metric};
use crate::probe::{ParseError, Probe, RawProbeResult};
use crate::store::{IngestWriter, WriteError};

/// Why a target produced no stored record this cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("target unreachable")]
    ProbeUnreachable,

    #[error("probe tool failed (exit code {code:?}): {stderr}")]
    ProbeToolError { code: Option<i32>, stderr: String },

    #[error("probe could not be launched: {0}")]
    ProbeLaunch(String),

    #[error("{source} (output: {output:?})")]
    Parse {
        #[source]
        source: ParseError,
        output: String,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl PipelineError {
    /// Stage the pipeline stopped at.
    pub fn stage(&self) -> Stage {
        match self {
            Self::ProbeUnreachable | Self::ProbeToolError { .. } | Self::ProbeLaunch(_) => {
                Stage::Probe
            }
            Self::Parse { .. } => Stage::Parse,
            Self::Format(_) => Stage::Format,
            Self::Write(_) => Stage::Write,
        }
    }

    /// Whether the store connection should be rebuilt before the next cycle.
    pub fn invalidates_connection(&self) -> bool {
        matches!(self, Self::Write(e) if e.invalidates_connection())
    }
}

/// Pipeline stage, used for logging and cycle accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Probe,
    Parse,
    Format,
    Write,
}

/// A successfully stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub measurements: usize,
    pub attempts: u32,
}

/// Run the full pipeline for `target`.
///
/// Every failure is returned as a value; nothing past the probe's own
/// subprocess is retried here except the write, which the writer bounds.
pub async fn run_pipeline(
    probe: &dyn Probe,
    target: &Target,
    static_tags: &Tags,
    writer: &IngestWriter,
) -> Result<Delivered, PipelineError> {
    let raw = probe.run(target).await;
    tracing::debug!(target_name = %target, outcome = raw.kind(), "Probe finished");

    let output = match raw {
        RawProbeResult::Success { output } => output,
        RawProbeResult::Unreachable { .. } => return Err(PipelineError::ProbeUnreachable),
        RawProbeResult::ToolError { code, stderr } => {
            return Err(PipelineError::ProbeToolError {
                code,
                stderr: snippet(&stderr),
            });
        }
        RawProbeResult::LaunchError { reason } => return Err(PipelineError::ProbeLaunch(reason)),
    };

    let metric = probe
        .parse(target, &output)
        .await
        .map_err(|source| PipelineError::Parse {
            source,
            output: snippet(&output),
        })?;
    tracing::trace!(target_name = %target, fields = metric.fields.len(), "Parsed probe output");

    let record = format_metric(&metric, static_tags)?;
    let attempts = writer.write(&record).await?;

    Ok(Delivered {
        measurements: record.len(),
        attempts,
    })
}
