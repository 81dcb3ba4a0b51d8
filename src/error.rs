//! Error types for linerpc.

use thiserror::Error;

/// Main error type for all linerpc operations.
///
/// Callers of [`invoke`](crate::RpcClient::invoke) can distinguish
/// four terminal outcomes: a success value, a [`RpcError::Remote`] protocol
/// error carrying the peer's numeric code and message, a [`RpcError::Timeout`],
/// and a connection-level failure ([`RpcError::ConnectionClosed`] /
/// [`RpcError::Io`] / [`RpcError::Correlation`]).
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol violation (oversized line, malformed envelope, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a JSON-RPC error object.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Numeric JSON-RPC error code (`-32601` = unknown method,
        /// `-1` = handler failure).
        code: i64,
        /// Human-readable message from the peer.
        message: String,
    },

    /// A response arrived whose id does not match the issued request.
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// The call did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection closed while the operation was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid registration (duplicate method name, bad prefix).
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
