//! Store Layer
//!
//! Delivery of formatted records to the time-series store.
//!
//! # Architecture
//!
//! ```text
//! StoreConnector::connect() ──► Arc<dyn MetricStore> ──► IngestWriter (per cycle)
//!        ▲                                                    │
//!        └──────────── reconnect when a write invalidates ◄───┘
//! ```
//!
//! [`IngestWriter`] applies a bounded [`RetryPolicy`] to each record;
//! connection establishment uses an unbounded one.

mod error;
pub mod influx;
mod retry;
mod traits;
mod writer;

pub use error::StoreError;
pub use influx::{InfluxConnector, InfluxStore, StoreConfig};
pub use retry::{RetryError, RetryPolicy};
pub use traits::{MetricStore, StoreConnector};
pub use writer::{IngestWriter, WriteError};
