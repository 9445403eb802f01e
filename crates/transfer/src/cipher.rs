//! Chunked ChaCha20 stream cipher.
//!
//! One keystream per session and direction. Every call consumes keystream
//! equal to the chunk length, so chunks must be processed in exactly the
//! order they were produced. There is no authentication at this layer: a
//! reordered or corrupted chunk decrypts to garbage, which the plaintext
//! digest then catches.

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use norman_protocol::{KEY_LEN, NONCE_LEN};

/// Misuse of a cipher stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherStateError {
    #[error("cipher stream already finished")]
    Finished,

    #[error("chunk of {len} bytes exceeds session chunk size {chunk_size}")]
    ChunkTooLarge { len: usize, chunk_size: usize },

    #[error("preamble must precede the first chunk")]
    PreambleAfterData,

    #[error("keystream exhausted")]
    KeystreamExhausted,
}

/// Which half of the socket a keystream protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Client to service. Uses the pairing nonce unchanged.
    Outbound,
    /// Service to client. Uses the pairing nonce with the top bit of the
    /// first byte flipped, so the two directions never share keystream.
    Inbound,
}

impl StreamDirection {
    fn nonce(self, seed: &[u8; NONCE_LEN]) -> [u8; NONCE_LEN] {
        let mut nonce = *seed;
        if self == Self::Inbound {
            nonce[0] ^= 0x80;
        }
        nonce
    }
}

/// Stateful chunk cipher for one session direction.
///
/// Block counter starts at 0 (IETF ChaCha20, 96-bit nonce), matching the
/// peer service's `counter(4 LE) || nonce(12)` layout.
pub struct CipherStream {
    cipher: ChaCha20,
    chunk_size: usize,
    position: u64,
    chunks: u64,
    finished: bool,
}

impl CipherStream {
    pub fn new(key: &[u8; KEY_LEN], nonce_seed: &[u8; NONCE_LEN], chunk_size: usize) -> Self {
        Self::for_direction(key, nonce_seed, chunk_size, StreamDirection::Outbound)
    }

    pub fn for_direction(
        key: &[u8; KEY_LEN],
        nonce_seed: &[u8; NONCE_LEN],
        chunk_size: usize,
        direction: StreamDirection,
    ) -> Self {
        let nonce = direction.nonce(nonce_seed);
        Self {
            cipher: ChaCha20::new(key.into(), &nonce.into()),
            chunk_size,
            position: 0,
            chunks: 0,
            finished: false,
        }
    }

    /// Encrypts the session preamble (handshake header) in place.
    ///
    /// The preamble is not bound by the chunk size but must come first.
    pub fn encrypt_preamble(&mut self, buf: &mut [u8]) -> Result<(), CipherStateError> {
        if self.finished {
            return Err(CipherStateError::Finished);
        }
        if self.chunks > 0 {
            return Err(CipherStateError::PreambleAfterData);
        }
        self.apply(buf)
    }

    /// Receiving side of [`encrypt_preamble`](Self::encrypt_preamble).
    pub fn decrypt_preamble(&mut self, buf: &mut [u8]) -> Result<(), CipherStateError> {
        self.encrypt_preamble(buf)
    }

    /// Encrypts the next chunk in place.
    pub fn encrypt_chunk(&mut self, buf: &mut [u8]) -> Result<(), CipherStateError> {
        self.process_chunk(buf)
    }

    /// Decrypts the next chunk in place.
    pub fn decrypt_chunk(&mut self, buf: &mut [u8]) -> Result<(), CipherStateError> {
        self.process_chunk(buf)
    }

    /// Marks the stream closed. Later calls fail with [`CipherStateError::Finished`].
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Keystream bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Chunks processed so far (the preamble is not counted).
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn process_chunk(&mut self, buf: &mut [u8]) -> Result<(), CipherStateError> {
        if self.finished {
            return Err(CipherStateError::Finished);
        }
        if buf.len() > self.chunk_size {
            return Err(CipherStateError::ChunkTooLarge {
                len: buf.len(),
                chunk_size: self.chunk_size,
            });
        }
        self.apply(buf)?;
        self.chunks += 1;
        Ok(())
    }

    fn apply(&mut self, buf: &mut [u8]) -> Result<(), CipherStateError> {
        self.cipher
            .try_apply_keystream(buf)
            .map_err(|_| CipherStateError::KeystreamExhausted)?;
        self.position += buf.len() as u64;
        Ok(())
    }
}
