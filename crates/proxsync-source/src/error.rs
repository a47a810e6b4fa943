// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for proxsync-source.

use thiserror::Error;

/// Result type using SourceError.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised while reading inventory from a Proxmox VE cluster.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The API could not be reached or refused our credentials.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The requested node or guest does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The API answered, but the payload did not have the expected shape.
    #[error("malformed source data in {context}: {reason}")]
    MalformedData { context: String, reason: String },
}

impl SourceError {
    pub(crate) fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::MalformedData {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the source as a whole is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::malformed("response body", err.to_string())
        } else {
            SourceError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::malformed("json", err.to_string())
    }
}
