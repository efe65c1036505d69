//! Core store traits.

use std::sync::Arc;

use crate::metric::Measurement;
use crate::store::StoreError;

/// An established connection to a time-series store.
///
/// Shared read-only by every writer in a cycle; each call is a
/// self-contained request.
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Write all measurements to `bucket` in a single request.
    async fn write(&self, bucket: &str, measurements: &[Measurement]) -> Result<(), StoreError>;
}

/// Factory for store connections.
///
/// The orchestrator calls `connect` at startup and again whenever a write
/// reports the connection as unusable.
#[async_trait::async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Construct and verify a connection.
    async fn connect(&self) -> Result<Arc<dyn MetricStore>, StoreError>;

    /// Bucket that writes go to.
    fn bucket(&self) -> &str;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}
