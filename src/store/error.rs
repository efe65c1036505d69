//! Store-specific error types.
//!
//! All store operations return [`StoreError`] on failure. The variant decides
//! whether a write is retried and whether the connection must be rebuilt.

use thiserror::Error;

/// Errors that can occur talking to the time-series store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store handle could not be constructed or failed its health check.
    #[error("connection error: {0}")]
    Connect(String),

    /// The request could not be delivered (DNS, TCP, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The store refused our credentials.
    #[error("unauthorized (HTTP {status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// The store rejected the payload itself; resending will not help.
    #[error("write rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// The store failed or throttled the request.
    #[error("store unavailable (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// Invalid store configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Transport(_) | Self::Server { .. }
        )
    }

    /// Whether the connection handle should be rebuilt before further writes.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Transport(_) | Self::Unauthorized { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Unauthorized { status, body },
            429 | 500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
