//! Error types for the access layer.
//!
//! Transport failures (`Transport`) and data failures (`Decode`) are kept as
//! separate variants so callers can tell a store problem from a data problem.

use rkv_client::ClientError;
use thiserror::Error;

/// Result type alias using DaoError.
pub type DaoResult<T> = std::result::Result<T, DaoError>;

/// Failure to turn a wire reply (or a stored payload) into a typed value.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The Registry has no rule for this command.
    #[error("command {0} not supported yet")]
    UnsupportedCommand(String),

    /// The reply shape does not match the command's rule.
    #[error("unexpected reply to {command}: expected {expected}")]
    UnexpectedReply {
        command: String,
        expected: &'static str,
    },

    /// A stored payload is not the JSON the caller asked for.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store answered with a nil reply.
    #[error("not found")]
    NotFound,
}

/// Unified error type for access-layer operations.
#[derive(Debug, Error)]
pub enum DaoError {
    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database {0} already exists")]
    DatabaseExists(String),

    #[error("index already defined {owner} = {index}")]
    IndexTaken { index: u32, owner: String },

    #[error("not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    // -------------------------------------------------------------------------
    // Decode Errors
    // -------------------------------------------------------------------------
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // -------------------------------------------------------------------------
    // Precondition Errors
    // -------------------------------------------------------------------------
    #[error("ids len != values len, {ids} != {values}")]
    LengthMismatch { ids: usize, values: usize },

    #[error("ids len != groups len, {ids} != {groups}")]
    GroupsMismatch { ids: usize, groups: usize },

    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl DaoError {
    /// True for dial, send, flush, receive and server error replies.
    pub fn is_transport(&self) -> bool {
        matches!(self, DaoError::Transport(_))
    }

    /// True when the store answered but the payload could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, DaoError::Decode(_))
    }

    /// True for a nil reply.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DaoError::Decode(DecodeError::NotFound))
    }
}
