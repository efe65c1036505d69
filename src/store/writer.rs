//! Ingest writer: bounded-retry delivery of formatted records.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::metric::FormattedRecord;
use crate::store::{MetricStore, RetryPolicy, StoreError};

/// A record that could not be written within the retry bound.
#[derive(Debug, Error)]
#[error("write failed after {attempts} attempt(s): {source}")]
pub struct WriteError {
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

impl WriteError {
    /// Whether the connection should be rebuilt before the next cycle.
    pub fn invalidates_connection(&self) -> bool {
        self.source.invalidates_connection()
    }
}

/// Writes one target's measurements to the store in a single request,
/// retrying per [`RetryPolicy`].
///
/// Cloning is cheap; clones share the store handle and the dropped-record
/// counter.
#[derive(Clone)]
pub struct IngestWriter {
    store: Arc<dyn MetricStore>,
    bucket: Arc<str>,
    policy: RetryPolicy,
    verbose: bool,
    dropped_records: Arc<AtomicU64>,
}

impl std::fmt::Debug for IngestWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestWriter")
            .field("bucket", &self.bucket)
            .field("policy", &self.policy)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl IngestWriter {
    pub fn new(store: Arc<dyn MetricStore>, bucket: impl Into<Arc<str>>, policy: RetryPolicy) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            policy,
            verbose: false,
            dropped_records: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log every record's line protocol before writing.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Records given up on since this writer was created.
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }

    /// Write `record`, returning the number of attempts it took.
    ///
    /// An empty record is a no-op that reports zero attempts.
    pub async fn write(&self, record: &FormattedRecord) -> Result<u32, WriteError> {
        if record.is_empty() {
            return Ok(0);
        }

        if self.verbose {
            tracing::info!(
                target_name = %record.target,
                bucket = %self.bucket,
                "Writing record:\n{}",
                record.to_line_protocol()
            );
        }

        let label = format!("write {}", record.target);
        let mut attempts = 0u32;
        let result = self
            .policy
            .run(
                &label,
                |attempt| {
                    attempts = attempt;
                    let store = Arc::clone(&self.store);
                    let bucket = Arc::clone(&self.bucket);
                    async move { store.write(&bucket, &record.measurements).await }
                },
                StoreError::is_retryable,
            )
            .await;

        match result {
            Ok(()) => Ok(attempts),
            Err(e) => {
                self.dropped_records.fetch_add(1, Ordering::Relaxed);
                Err(WriteError {
                    attempts: e.attempts,
                    source: e.error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{FieldValue, Measurement, Target};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Store that fails the first `failures` writes with a cloneable error.
    struct FlakyStore {
        failures: u32,
        error: fn() -> StoreError,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyStore {
        fn new(failures: u32, error: fn() -> StoreError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl MetricStore for FlakyStore {
        async fn write(&self, bucket: &str, _: &[Measurement]) -> Result<(), StoreError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(bucket.to_string());
            if calls.len() as u32 <= self.failures {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    fn record() -> FormattedRecord {
        let target = Target::new("8.8.8.8");
        let mut measurement = Measurement::new("ping", 1);
        measurement.tags.insert("target".into(), "8.8.8.8".into());
        measurement.fields.insert("packet_loss".into(), FieldValue::Float(0.0));
        FormattedRecord {
            target,
            timestamp_ns: 1,
            measurements: vec![measurement],
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::bounded(attempts, Duration::from_millis(1))
    }

    fn unavailable() -> StoreError {
        StoreError::from_status(503, "busy")
    }

    #[tokio::test]
    async fn test_write_first_try() {
        let store = FlakyStore::new(0, unavailable);
        let writer = IngestWriter::new(store.clone(), "netpulse", policy(3));

        assert_eq!(writer.write(&record()).await.unwrap(), 1);
        assert_eq!(store.calls(), 1);
        assert_eq!(store.calls.lock().unwrap()[0], "netpulse");
    }

    #[tokio::test]
    async fn test_write_recovers_within_bound() {
        let store = FlakyStore::new(2, unavailable);
        let writer = IngestWriter::new(store.clone(), "netpulse", policy(3));

        assert_eq!(writer.write(&record()).await.unwrap(), 3);
        assert_eq!(writer.dropped_records(), 0);
    }

    #[tokio::test]
    async fn test_write_gives_up_after_bound() {
        let store = FlakyStore::new(u32::MAX, unavailable);
        let writer = IngestWriter::new(store.clone(), "netpulse", policy(3));

        let err = writer.write(&record()).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(store.calls(), 3);
        assert!(!err.invalidates_connection());
        assert_eq!(writer.dropped_records(), 1);
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_retried() {
        let store = FlakyStore::new(u32::MAX, || StoreError::from_status(400, "bad line"));
        let writer = IngestWriter::new(store.clone(), "netpulse", policy(3));

        let err = writer.write(&record()).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_invalidates_connection() {
        let store = FlakyStore::new(u32::MAX, || StoreError::Transport("refused".into()));
        let writer = IngestWriter::new(store, "netpulse", policy(2));

        let err = writer.write(&record()).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.invalidates_connection());
    }

    #[tokio::test]
    async fn test_empty_record_skips_store() {
        let store = FlakyStore::new(0, unavailable);
        let writer = IngestWriter::new(store.clone(), "netpulse", policy(3)).with_verbose(true);
        let empty = FormattedRecord {
            target: Target::new("x"),
            timestamp_ns: 0,
            measurements: Vec::new(),
        };

        assert_eq!(writer.write(&empty).await.unwrap(), 0);
        assert_eq!(store.calls(), 0);
    }
}
