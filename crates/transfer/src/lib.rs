//! Streaming building blocks shared by uploads and downloads.
//!
//! - [`DigestEngine`]: incremental XXH3-64 over plaintext chunks
//! - [`CipherStream`]: ChaCha20 keystream applied chunk by chunk
//! - [`ChunkSource`]: reads any async source in fixed-size chunks through
//!   one reusable buffer, so memory stays bounded by the chunk size

mod chunked;
pub mod cipher;
pub mod digest;

pub use chunked::ChunkSource;
pub use cipher::{CipherStateError, CipherStream, StreamDirection};
pub use digest::{Digest, DigestEngine, DigestError, digest_bytes, digest_file};

use serde::{Deserialize, Serialize};

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk size a session may negotiate: 16 MiB.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default socket write buffer: 256 KiB.
pub const DEFAULT_WRITE_BUFFER: usize = 256 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Cipher(#[from] CipherStateError),

    #[error("invalid I/O config: {0}")]
    InvalidConfig(String),
}

/// Chunking and buffering parameters for socket transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Plaintext bytes per frame. Fixed for the lifetime of a session.
    pub chunk_size: usize,
    /// Capacity of the buffered socket writer.
    pub write_buffer: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_buffer: DEFAULT_WRITE_BUFFER,
        }
    }
}

impl IoConfig {
    /// Checks that the sizes are usable.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidConfig(format!(
                "chunk_size must be in 1..={MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.write_buffer == 0 {
            return Err(TransferError::InvalidConfig(
                "write_buffer must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Running totals reported while a transfer streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Plaintext bytes processed so far.
    pub bytes: u64,
    /// Data frames processed so far.
    pub frames: u64,
    /// Total bytes, when known up front.
    pub total: Option<u64>,
}
