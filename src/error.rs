//! Error types for the Eras client.

use thiserror::Error;

use crate::protocol::FetchErrorCode;

/// Errors that can occur when using the Eras client.
#[derive(Debug, Error)]
pub enum ErasError {
    /// Query arguments could not be canonicalized (non-serializable value).
    #[error("invalid query argument: {0}")]
    InvalidArgument(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires a running cache, but it has shut down.
    #[error("query cache has shut down")]
    ShutDown,

    /// The backend rejected or errored a query.
    #[error("fetch error: {message}")]
    Fetch {
        /// Human-readable error message from the backend.
        message: String,
        /// Structured error code, if provided by the backend.
        code: Option<FetchErrorCode>,
    },

    /// A prefetch was cancelled before it resolved.
    #[error("load cancelled")]
    Cancelled,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Eras client operations.
pub type Result<T> = std::result::Result<T, ErasError>;
