//! Control-plane payload types for Norman file transfers.
//!
//! Everything the transfer core exchanges with the HTTP control plane:
//! socket pairing (allocation) requests and responses, checksum
//! finalization, link submission and download metadata. JSON field names
//! are snake_case to match the control-plane schemas.

pub mod messages;
pub mod pairing;
pub mod types;

pub use messages::{
    AssetDownloadRequest, ChecksumRequest, InputDownloadRequest, OutputDownloadRequest,
    SocketAssetPairingRequest, SocketInputPairingRequest, SocketOutputPairingRequest,
    TrackedDownload,
};
pub use pairing::{KEY_LEN, NONCE_LEN, PairingSecrets, SocketPairingResponse};
pub use types::{AssetIds, Direction, InputIds, OutputIds, TransferKind};

/// Errors produced while decoding control-plane payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("field `{field}` is not valid base64")]
    InvalidBase64 { field: &'static str },

    #[error("field `{field}` must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("pairing response has no host")]
    MissingHost,
}
