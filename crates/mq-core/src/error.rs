//! Error taxonomy shared by every layer of the queue substrate.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CoreError {
    #[error("connection for this key already exists")]
    ConnExists,
    #[error("no connection registered for this key")]
    ConnDoesNotExist,
    #[error("server is closed")]
    ServerClosed,
    #[error("client is closed")]
    ClientClosed,
    #[error("connection is closed")]
    ConnClosed,
    #[error("invalid message type")]
    InvalidMsgType,
    #[error("invalid message header")]
    InvalidHeader,
    #[error("invalid message body length")]
    InvalidLength,
    #[error("no request callback registered for this id")]
    ReqFuncMissing,
    #[error("cannot transition to connected state")]
    CannotSetConnected,
    #[error("invalid status byte")]
    InvalidStatus,
    #[error("forbidden: credentials rejected")]
    Forbidden,
    #[error("connection has not been initialized")]
    NotInitialized,
    #[error("cannot replace an active socket outside of refresh")]
    CannotReplaceActiveSocket,
    #[error("chunk input of {0} bytes exceeds 16-byte limit")]
    InvalidChunkLen(usize),
    #[error("queue is closed")]
    QueueClosed,
    #[error("socket error: {0}")]
    Io(String),
}

impl From<crate::wire::WireError> for CoreError {
    fn from(e: crate::wire::WireError) -> Self {
        match e {
            crate::wire::WireError::InvalidHeader => CoreError::InvalidHeader,
            crate::wire::WireError::InvalidLength(_) => CoreError::InvalidLength,
            crate::wire::WireError::InvalidMsgType(_) => CoreError::InvalidMsgType,
            crate::wire::WireError::InvalidStatus(_) => CoreError::InvalidStatus,
            crate::wire::WireError::Io(e) => CoreError::Io(e.to_string()),
        }
    }
}
