//! Error types for grove-core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::parser::ParseError;

/// Domain-specific errors for grove operations.
///
/// Structural and validation errors are returned as typed results so callers
/// can decide per operation whether to retry or surface them.
#[derive(Error, Debug)]
pub enum GroveError {
    /// A referenced block, page or file does not resolve.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was being looked up (`block`, `page`, `anchor`, ...).
        kind: &'static str,
        /// The identifier that did not resolve.
        id: String,
    },

    /// An identity or canonical name collides with an existing one.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A move would make a block its own ancestor.
    #[error("Cannot move block {block} under its own descendant {target}")]
    CyclicMove {
        /// The block being moved.
        block: Uuid,
        /// The requested target.
        target: Uuid,
    },

    /// The operation is not valid for the given arguments.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A configuration value is invalid.
    ///
    /// Used for validation errors detected at runtime (e.g., batch_size=0).
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// Configuration file could not be read or parsed.
    #[error("Config invalid at {path}: {message}")]
    InvalidConfig {
        /// Path of the offending file.
        path: String,
        /// Parse or I/O failure.
        message: String,
    },

    /// A file could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The batch failed validation; see the conflict report.
    #[error("Batch rejected: {count} conflict(s)")]
    BatchRejected {
        /// Number of conflicts found.
        count: usize,
    },

    /// The storage layer rejected the transaction or failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description from the storage layer.
        message: String,
        /// Whether the failure was a unique-identity violation.
        unique_violation: bool,
    },

    /// The stored graph violates a structural invariant.
    #[error("Corrupt graph: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GroveError {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create an invalid-operation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Serializable classification used on the wire and in reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GroveError::NotFound { .. } => ErrorKind::NotFound,
            GroveError::Conflict(_) | GroveError::BatchRejected { .. } => ErrorKind::Conflict,
            GroveError::Storage {
                unique_violation: true,
                ..
            } => ErrorKind::Conflict,
            GroveError::CyclicMove { .. } => ErrorKind::CyclicMove,
            GroveError::Parse(_) => ErrorKind::ParseError,
            GroveError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            GroveError::InvalidConfiguration { .. } | GroveError::InvalidConfig { .. } => {
                ErrorKind::InvalidConfiguration
            }
            GroveError::Storage { .. }
            | GroveError::Corrupt(_)
            | GroveError::Io(_)
            | GroveError::Json(_) => ErrorKind::Internal,
        }
    }
}

/// Flat error classification shared with the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CyclicMove,
    InvalidOperation,
    InvalidConfiguration,
    ParseError,
    Timeout,
    ConnectionClosed,
    NoBackendAvailable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::CyclicMove => "cyclic-move",
            ErrorKind::InvalidOperation => "invalid-operation",
            ErrorKind::InvalidConfiguration => "invalid-configuration",
            ErrorKind::ParseError => "parse-error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionClosed => "connection-closed",
            ErrorKind::NoBackendAvailable => "no-backend-available",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Result alias for grove-core operations.
pub type GroveResult<T> = Result<T, GroveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            GroveError::not_found("block", Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            GroveError::Storage {
                message: "dup".into(),
                unique_violation: true
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::CyclicMove).unwrap(),
            "\"cyclic-move\""
        );
    }
}
