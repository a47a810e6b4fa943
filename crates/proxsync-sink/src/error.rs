// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for proxsync-sink.

use thiserror::Error;

/// Result type using SinkError.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Errors returned by a sink client call.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The object (or a referenced object) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write collides with an existing object.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The sink refused a field value.
    #[error("validation rejected for '{field}': {message}")]
    ValidationRejected { field: String, message: String },

    /// Network, authentication or server failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),
}

impl SinkError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::ValidationRejected {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the sink as a whole is unreachable, which aborts a batch.
    pub fn is_transport(&self) -> bool {
        matches!(self, SinkError::Transport(_))
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SinkError::UnexpectedResponse(err.to_string())
        } else {
            SinkError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::UnexpectedResponse(err.to_string())
    }
}
