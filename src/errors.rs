//! Crate-specific error types for session-sync.

use std::io;
use thiserror::Error;

/// Result alias for session-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type covering transport, schema, path, and persistence issues.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Wrapper for `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wrapper for JSON encoding and decoding errors.
    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Error when a flush attempt against the backing store fails.
    #[error("flush failed: {0}")]
    FlushFailed(String),

    /// Error reported when a batch is dropped at the retry bound.
    #[error("batch abandoned after {attempts} failed flush attempts: {last_error}")]
    RetriesExhausted {
        /// Consecutive failed attempts at the moment the batch was dropped.
        attempts: u32,
        /// Message of the final sink error.
        last_error: String,
    },

    /// Error when a path segment is empty or carries a reserved character.
    #[error("invalid path segment {segment:?}")]
    InvalidPathSegment {
        /// The offending segment.
        segment: String,
    },

    /// Error when a decoded payload violates a schema invariant.
    #[error("invalid {field}: {reason}")]
    Schema {
        /// Field or structure that failed validation.
        field: &'static str,
        /// Description of the violation.
        reason: String,
    },
}
