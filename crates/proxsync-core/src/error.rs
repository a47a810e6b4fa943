// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for proxsync-core.

use proxsync_sink::{ObjectId, SinkError};
use proxsync_source::SourceError;
use thiserror::Error;

/// Result type using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by a sync batch or by a single entity within it.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The source could not be reached. Aborts the batch.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The sink could not be reached. Aborts the batch.
    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The source answered with data we cannot interpret. Aborts the batch.
    #[error("malformed source data in {context}: {reason}")]
    MalformedSourceData { context: String, reason: String },

    /// More than one sink record claims the same source entity.
    #[error("{entity} matches {} sink records: {candidates:?}", .candidates.len())]
    IdentityAmbiguous {
        entity: String,
        candidates: Vec<ObjectId>,
    },

    /// The sink refused a value, even after sanitizing.
    #[error("validation rejected for '{field}': {message}")]
    ValidationRejected { field: String, message: String },

    /// A required object is missing and cannot be created.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write collides with an existing sink object.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The sink answered with something unexpected.
    #[error("sink error: {0}")]
    Sink(String),

    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the error stops the whole batch rather than one entity.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable(_)
                | SyncError::SinkUnavailable(_)
                | SyncError::MalformedSourceData { .. }
        )
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => SyncError::SourceUnavailable(msg),
            SourceError::NotFound(msg) => SyncError::NotFound(msg),
            SourceError::MalformedData { context, reason } => {
                SyncError::MalformedSourceData { context, reason }
            }
            SourceError::Config(msg) => SyncError::Config(msg),
            other => SyncError::SourceUnavailable(other.to_string()),
        }
    }
}

impl From<SinkError> for SyncError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Transport(msg) => SyncError::SinkUnavailable(msg),
            SinkError::NotFound(msg) => SyncError::NotFound(msg),
            SinkError::Conflict(msg) => SyncError::Conflict(msg),
            SinkError::ValidationRejected { field, message } => {
                SyncError::ValidationRejected { field, message }
            }
            SinkError::Config(msg) => SyncError::Config(msg),
            other => SyncError::Sink(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_batch_fatal() {
        let err: SyncError = SinkError::Transport("connection refused".to_string()).into();
        assert!(err.is_batch_fatal());
        let err: SyncError = SourceError::Unavailable("timeout".to_string()).into();
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn test_entity_errors_are_not_batch_fatal() {
        let err: SyncError = SinkError::validation("name", "bad").into();
        assert!(!err.is_batch_fatal());
        assert!(matches!(err, SyncError::ValidationRejected { .. }));

        let err = SyncError::IdentityAmbiguous {
            entity: "vmid 100".to_string(),
            candidates: vec![4, 9],
        };
        assert!(!err.is_batch_fatal());
        assert_eq!(err.to_string(), "vmid 100 matches 2 sink records: [4, 9]");
    }
}
