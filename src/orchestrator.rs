//! Orchestration Layer
//!
//! Drives the Probe → Parse → Format → Write pipeline for each target, once
//! per cycle, under a crash-recovery [`Supervisor`].
//!
//! # State machine
//!
//! ```text
//! Initializing ──connect ok──► Running ──cycle, sleep──► Running ...
//!      ▲                          │
//!      └── write invalidated ◄────┘
//! ```

mod cycle;
mod pipeline;
mod supervisor;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

pub use cycle::{CycleOrchestrator, CycleReport, CycleSettings, TargetLoader};
pub use pipeline::{Delivered, PipelineError, Stage, run_pipeline};
pub use supervisor::Supervisor;

/// Failures that escape a cycle loop and reach the supervisor.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The store connection failed in a way retrying cannot fix.
    #[error("store connection failed: {0}")]
    Connect(#[source] StoreError),

    /// The target list could not be read.
    #[error("failed to load targets: {0}")]
    Targets(#[from] ConfigError),

    /// The target list is empty.
    #[error("no targets configured")]
    NoTargets,

    /// The worker pool was closed underneath a running cycle.
    #[error("worker pool closed: {0}")]
    WorkerPool(#[from] tokio::sync::AcquireError),
}
