//! Error types for the resilience layer.

use thiserror::Error;

/// Result type for resilience-layer operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in the resilience layer.
///
/// Every variant is classified as recoverable or not by
/// [`ResilienceError::is_recoverable`]; only recoverable errors are retried.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The adaptive deadline expired before the transport answered.
    #[error("{endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// The transport could not reach the service.
    #[error("network error: {0}")]
    Network(String),

    /// The request was malformed before it left the client.
    #[error("validation error: {0}")]
    Validation(String),

    /// A differential sync pass is already running.
    #[error("a sync is already in progress")]
    SyncInProgress,

    /// A write was attempted offline with offline support disabled.
    #[error("offline writes are disabled")]
    OfflineNotSupported,

    /// Replaying the offline queue failed; the operations were put back.
    #[error("offline sync failed for {operation_count} operations: {source}")]
    OfflineSyncFailed {
        operation_count: usize,
        #[source]
        source: Box<ResilienceError>,
    },

    /// Retries were exhausted for a batch (or a single operation).
    #[error("batch of {operation_count} operations failed after {attempts} attempts: {source}")]
    BatchOperation {
        operation_count: usize,
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    /// The service answered a single operation with a failure.
    #[error("operation failed: {code}: {message}")]
    Operation {
        status: Option<u16>,
        code: String,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The compressor failed.
    #[error("compression error: {0}")]
    Compression(String),
}

impl ResilienceError {
    /// Whether retrying the same call later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::Network(_)
            | Self::SyncInProgress
            | Self::OfflineSyncFailed { .. } => true,
            Self::Operation { status, .. } => {
                status.is_some_and(|s| s >= 500 || s == 408 || s == 429)
            }
            Self::BatchOperation { source, .. } => source.is_recoverable(),
            Self::Validation(_)
            | Self::OfflineNotSupported
            | Self::Serialization(_)
            | Self::Compression(_) => false,
        }
    }

    /// Number of operations affected, when the error carries one.
    pub fn operation_count(&self) -> Option<usize> {
        match self {
            Self::OfflineSyncFailed { operation_count, .. }
            | Self::BatchOperation { operation_count, .. } => Some(*operation_count),
            _ => None,
        }
    }
}

impl From<carelink_types::Error> for ResilienceError {
    fn from(e: carelink_types::Error) -> Self {
        Self::Validation(e.to_string())
    }
}
