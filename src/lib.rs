//! netpulse - Network Diagnostic Collector
//!
//! Periodically runs external network diagnostic tools (`ping`, the Ookla
//! `speedtest` CLI) against configured targets, parses their output into
//! typed metrics and writes them to an InfluxDB-compatible time-series store.
//!
//! # Architecture
//!
//! - **Probe**: Runs one tool against one target and parses its output
//! - **Metric**: Normalized metrics, measurement layout and line protocol
//! - **Store**: Connection lifecycle and bounded-retry ingest writer
//! - **Orchestrator**: Bounded-concurrency cycles under a crash-recovery supervisor
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use netpulse::config::AppConfig;
//! use netpulse::orchestrator::CycleOrchestrator;
//! use netpulse::probe::PingProbe;
//! use netpulse::store::InfluxConnector;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/netpulse.yaml")?;
//! let orchestrator = CycleOrchestrator::new(
//!     Arc::new(PingProbe::new(config.ping.clone())),
//!     config.ping_targets()?,
//!     Arc::new(InfluxConnector::new(config.store.clone())),
//!     config.ping_settings(),
//! );
//! orchestrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod metric;
pub mod orchestrator;
pub mod probe;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use metric::{
    FieldValue, FormatError, FormattedRecord, Measurement, NormalizedMetric, ProbeFamily, Tags,
    Target, format_metric,
};
pub use orchestrator::{
    CycleOrchestrator, CycleReport, CycleSettings, OrchestratorError, PipelineError, Supervisor,
};
pub use probe::{ParseError, PingConfig, PingProbe, Probe, RawProbeResult, SpeedtestConfig, SpeedtestProbe};
pub use store::{
    InfluxConnector, IngestWriter, MetricStore, RetryPolicy, StoreConfig, StoreConnector,
    StoreError, WriteError,
};
