//! Error types for GridKV client operations.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The main error type for GridKV client operations.
///
/// This enum covers client-side errors (configuration, connection, routing)
/// and server-side errors (returned as a non-zero status in a response frame).
#[derive(Debug, Error, Clone)]
pub enum GridError {
    /// A caller supplied an invalid argument (bad endpoint string, empty
    /// endpoint list, empty cache name). Raised synchronously from
    /// configuration and cache entry points.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// An operation was attempted while the router is in the wrong state.
    #[error("illegal state: client is {0}")]
    IllegalState(String),

    /// Opening the TCP or TLS socket failed. Retried across endpoints during
    /// the initial sweep; surfaced only when every endpoint fails.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected protocol version negotiation.
    #[error("handshake rejected: {0}")]
    HandshakeFailed(String),

    /// The server rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A session died while a request was outstanding, or before the response
    /// arrived. The router recovers from this error by failing over; it is
    /// surfaced only when no sessions remain.
    #[error("Lost connection: {0}")]
    LostConnection(String),

    /// The server completed the request with a non-zero status.
    #[error("operation error ({code}): {message}")]
    Operation {
        /// The server status code from the response frame.
        code: i32,
        /// The error message reported by the server.
        message: String,
    },

    /// The binary codec refused a value/type combination, or a buffer ended
    /// before the value it carries.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors from the standard library (wrapped in `Arc` for `Clone`).
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for GridError {
    fn from(err: io::Error) -> Self {
        GridError::Io(Arc::new(err))
    }
}

impl GridError {
    /// Returns `true` if this error triggers failover inside the router.
    ///
    /// Only a lost connection is recoverable by retrying on another node;
    /// every other error surfaces to the caller unmodified.
    pub fn is_lost_connection(&self) -> bool {
        matches!(self, Self::LostConnection(_))
    }

    /// Creates an `Operation` error from a server status code and message.
    pub fn from_server(code: i32, message: String) -> Self {
        Self::Operation { code, message }
    }

    /// Returns the server status code if this is an `Operation` error.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Self::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A specialized `Result` type for GridKV operations.
pub type Result<T> = std::result::Result<T, GridError>;
