//! Per-operation outcomes reported by the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error detail attached to a failed sub-operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub code: String,
    pub message: String,
}

/// Result of one operation, individually reported even inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    /// HTTP-equivalent status, when the transport has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl OperationOutcome {
    /// A successful outcome carrying `data`.
    pub fn ok(status: u16, data: Value) -> Self {
        Self {
            success: true,
            status: Some(status),
            data: Some(data),
            error: None,
        }
    }

    /// A successful outcome with no body (e.g. a delete).
    pub fn no_content(status: u16) -> Self {
        Self {
            success: true,
            status: Some(status),
            data: None,
            error: None,
        }
    }

    /// A failed outcome.
    pub fn failed(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: Some(status),
            data: None,
            error: Some(OutcomeError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}
