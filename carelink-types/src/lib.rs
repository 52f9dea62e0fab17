//! Core type definitions for the Carelink clinical-record client.
//!
//! This crate defines the plain data types that flow between the
//! resilience layer and the clinical-record transport:
//! - Operation and subscription identifiers
//! - Resource keys (`Patient/123`)
//! - Batch operations (create, read, update, delete, search)
//! - Per-operation outcomes reported by the transport
//!
//! Nothing here performs I/O. The transport wire format is owned by the
//! transport implementation, not by these types.

mod ids;
mod operation;
mod outcome;
mod resource;

pub use ids::{OperationId, SubscriptionId};
pub use operation::{BatchOperation, ConditionalHeaders, Method};
pub use outcome::{OperationOutcome, OutcomeError};
pub use resource::{ResourceKey, resource_id_of, resource_type_of, version_id_of};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid resource key: {0}")]
    InvalidResourceKey(String),
}
