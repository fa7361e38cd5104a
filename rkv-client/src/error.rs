//! Error types for the pooled client.

use thiserror::Error;

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while dialing, writing or reading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Pool was closed; no further connections are handed out.
    #[error("connection pool closed")]
    PoolClosed,

    /// Address could not be parsed into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ClientError {
    /// Returns true when the connection that produced this error can no
    /// longer be trusted to be in sync with the server.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Protocol(_))
    }
}
