//! Error types for the socket channel.

use norman_protocol::{Direction, ProtocolError};
use norman_transfer::{CipherStateError, Digest, DigestError, TransferError};

/// Errors produced by the socket channel and client.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("cancelled")]
    Cancelled,

    #[error("channel closed by peer")]
    ChannelClosed,

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("incomplete transfer: received {received} bytes, expected {expected:?}")]
    IncompleteTransfer { received: u64, expected: Option<u64> },

    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error(transparent)]
    Cipher(#[from] CipherStateError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("session is for {0}, not this operation")]
    WrongDirection(Direction),

    #[error("invalid pairing: {0}")]
    Pairing(#[from] ProtocolError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl SocketError {
    /// True for errors raised before or while establishing the session.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}
