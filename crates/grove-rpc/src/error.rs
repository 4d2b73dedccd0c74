//! Error types for grove-rpc.

use std::time::Duration;

use grove_core::{ErrorKind, GroveError};
use thiserror::Error;

/// Errors raised by the protocol and routing layer.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No response arrived within the request timeout. The backend may
    /// still have applied the operation.
    #[error("Request {op} timed out after {}ms", .after.as_millis())]
    Timeout { op: &'static str, after: Duration },

    /// The transport closed before a response arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Neither a local nor a usable remote backend can run the operation.
    #[error("No backend available for {op}")]
    NoBackendAvailable { op: &'static str },

    /// The remote backend answered with an error.
    #[error("Remote {kind}: {message}")]
    Remote { kind: ErrorKind, message: String },

    /// An operation failed in the local engine.
    #[error(transparent)]
    Core(#[from] GroveError),

    /// A message could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl RpcError {
    /// Flat classification, shared with grove-core and the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Timeout { .. } => ErrorKind::Timeout,
            RpcError::ConnectionClosed => ErrorKind::ConnectionClosed,
            RpcError::NoBackendAvailable { .. } => ErrorKind::NoBackendAvailable,
            RpcError::Remote { kind, .. } => *kind,
            RpcError::Core(err) => err.kind(),
            RpcError::Codec(_) | RpcError::Io(_) | RpcError::Task(_) => ErrorKind::Internal,
        }
    }

    /// Message without the classification prefix, as sent on the wire.
    pub fn wire_message(&self) -> String {
        match self {
            RpcError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RpcError {
    fn from(err: tokio::task::JoinError) -> Self {
        RpcError::Task(err.to_string())
    }
}

/// Result alias for grove-rpc operations.
pub type RpcResult<T> = Result<T, RpcError>;
