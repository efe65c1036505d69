//! Probe Layer
//!
//! External diagnostic tools behind a common [`Probe`] trait. Each probe
//! runs its tool as a subprocess and parses the captured output.
//!
//! # Families
//!
//! - [`ping::PingProbe`]: Reachability and latency via `ping`
//! - [`speedtest::SpeedtestProbe`]: Bandwidth via the Ookla `speedtest` CLI

pub mod ping;
pub mod runner;
pub mod speedtest;
mod traits;

pub use ping::{PingConfig, PingProbe};
pub use runner::{ToolOutput, run_tool};
pub use speedtest::{SpeedtestConfig, SpeedtestProbe};
pub use traits::{ParseError, Probe, RawProbeResult, now_ns};
