//! Error types for grove-db.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::Attr;

/// Result type alias for grove-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in grove-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Transaction errors
    // ========================================================================
    /// An identity lookup or entity id did not resolve when it was applied.
    #[error("Unresolved entity reference: {reference}")]
    UnresolvedEntity { reference: String },

    /// A unique attribute value is already held by a different entity.
    #[error("Unique constraint violated on {attr}: value {value} already held by entity {holder}")]
    UniqueViolation {
        attr: Attr,
        value: String,
        holder: u64,
    },

    /// An `Ensure` was issued for an attribute that is not an identity.
    #[error("Attribute {attr} is not an identity attribute")]
    NotIdentity { attr: Attr },

    /// The value type does not match the attribute schema.
    #[error("Value type mismatch for {attr}: {message}")]
    TypeMismatch { attr: Attr, message: String },

    // ========================================================================
    // Log store errors
    // ========================================================================
    /// Transaction log I/O error.
    #[error("Transaction log I/O error at {path}: {message}")]
    LogIo { path: PathBuf, message: String },

    /// Transaction log parse error.
    #[error("Transaction log parse error at {path} line {line}: {message}")]
    LogParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    // ========================================================================
    // General errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unresolved entity error.
    pub fn unresolved(reference: impl std::fmt::Display) -> Self {
        Self::UnresolvedEntity {
            reference: reference.to_string(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(attr: Attr, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            attr,
            message: message.into(),
        }
    }

    /// Create a log I/O error.
    pub fn log_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LogIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
