//! JSON bodies returned by the upload endpoint.

use serde::{Deserialize, Serialize};

/// Failure body: `{"message": "<error text>"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Human-readable error description.
    pub message: String,
}

impl ErrorResponse {
    /// Build a response carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
