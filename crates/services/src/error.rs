//! Orchestration error types.

use norman_api::ApiError;
use norman_socket::SocketError;
use norman_transfer::{Digest, TransferError};

use crate::state::TransferState;

/// Errors produced while orchestrating a transfer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("credential error: {0}")]
    Credential(&'static str),

    #[error("control plane error: {0}")]
    Api(ApiError),

    #[error("socket error: {0}")]
    Socket(SocketError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum {digest} rejected by the service: {detail}")]
    DigestMismatch { digest: Digest, detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error("illegal state transition {from} -> {to}")]
    InvalidTransition {
        from: TransferState,
        to: TransferState,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<ApiError> for ServiceError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Credential(msg) => Self::Credential(msg),
            other => Self::Api(other),
        }
    }
}

impl From<SocketError> for ServiceError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Cancelled => Self::Cancelled,
            other => Self::Socket(other),
        }
    }
}

impl ServiceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
