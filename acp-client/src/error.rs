//! Client error types.

use thiserror::Error;

/// Client errors.
///
/// Every transport error is fatal to the session it came from; the caller
/// has to close it and connect again.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("timeout: expected {expected} bytes but only received {received}")]
    Timeout { expected: usize, received: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(#[from] acp_protocol::ProtocolError),
}

impl ClientError {
    /// Returns whether retrying on a fresh session may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Connection { .. } => true,
            ClientError::Io(_) => true,
            ClientError::Timeout { .. } => true,
            ClientError::ConnectionClosed => true,
            _ => false,
        }
    }
}
