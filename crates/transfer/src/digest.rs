//! XXH3-64 digest computed over plaintext as it streams.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::AsyncReadExt;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Errors from the digest engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("digest already finalized")]
    AlreadyFinalized,

    #[error("invalid digest `{0}`: expected 16 hex digits")]
    Parse(String),
}

/// A finalized 64-bit content digest.
///
/// Rendered and serialized as 16 lowercase hex digits (big-endian), the
/// format the control plane expects in `checksum` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(u64);

impl Digest {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(DigestError::Parse(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| DigestError::Parse(s.to_string()))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental digest accumulator.
///
/// Feed chunks in stream order; the result does not depend on how the
/// stream was split. Once finalized the engine refuses further input.
pub struct DigestEngine {
    hasher: Box<Xxh3>,
    bytes: u64,
    finalized: bool,
}

impl Default for DigestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestEngine {
    pub fn new() -> Self {
        Self {
            hasher: Box::new(Xxh3::new()),
            bytes: 0,
            finalized: false,
        }
    }

    /// Absorbs the next plaintext chunk.
    pub fn update(&mut self, data: &[u8]) -> Result<(), DigestError> {
        if self.finalized {
            return Err(DigestError::AlreadyFinalized);
        }
        self.hasher.update(data);
        self.bytes += data.len() as u64;
        Ok(())
    }

    /// Produces the digest. A second call is an error.
    pub fn finalize(&mut self) -> Result<Digest, DigestError> {
        if self.finalized {
            return Err(DigestError::AlreadyFinalized);
        }
        self.finalized = true;
        Ok(Digest(self.hasher.digest()))
    }

    /// Bytes absorbed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// One-shot digest of an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> Digest {
    Digest(xxh3_64(data))
}

/// Digests a whole file without loading it into memory.
pub async fn digest_file(path: &Path) -> Result<Digest, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut engine = DigestEngine::new();
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        engine.update(&buf[..n])?;
    }
    Ok(engine.finalize()?)
}
