//! Error types for writelock-core operations.
//!
//! Routine outcomes ("someone else holds the lock", "you are not an admin")
//! are not errors; they come back as [`crate::AcquireOutcome`] and
//! [`crate::ForceUnlockOutcome`]. This enum covers the exceptional paths.

use std::path::PathBuf;

/// All errors that can occur in writelock-core operations.
#[derive(Debug, thiserror::Error)]
pub enum WriteLockError {
    // ─────────────────────────────────────────────────────────────────────
    // Gate Errors
    // ─────────────────────────────────────────────────────────────────────
    /// A mutating call reached the write gate without a valid write lock.
    #[error("Write operation denied: {reason}")]
    WriteDenied { reason: String },

    #[error("A lock coordinator is already attached to this database")]
    CoordinatorAlreadyAttached,

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Database error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed: {context}: {message}")]
    Operation { context: String, message: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },
}

impl WriteLockError {
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        WriteLockError::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WriteLockError::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the error came from the write gate rather than from storage.
    pub fn is_write_denied(&self) -> bool {
        matches!(self, WriteLockError::WriteDenied { .. })
    }
}

/// Convenience type alias for Results using WriteLockError.
pub type Result<T> = std::result::Result<T, WriteLockError>;

// Conversion for string error compatibility
impl From<WriteLockError> for String {
    fn from(err: WriteLockError) -> String {
        err.to_string()
    }
}
