//! Socket pairing response and the session secrets it carries.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::ProtocolError;

/// ChaCha20 key length in bytes.
pub const KEY_LEN: usize = 32;

/// ChaCha20 (IETF) nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Allocation result returned by the control plane.
///
/// Key, nonce and authentication header are base64 on the wire and are
/// never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketPairingResponse {
    pub pairing_id: String,
    pub host: String,
    pub port: u16,
    pub encryption_key: String,
    pub nonce: String,
    pub authentication_header: String,
    /// Payload size announced by the service (downloads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_in_bytes: Option<u64>,
    /// Expected plaintext digest (downloads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl fmt::Debug for SocketPairingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketPairingResponse")
            .field("pairing_id", &self.pairing_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption_key", &"<redacted>")
            .field("nonce", &"<redacted>")
            .field("authentication_header", &"<redacted>")
            .field("file_size_in_bytes", &self.file_size_in_bytes)
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl SocketPairingResponse {
    /// Returns the `host:port` endpoint of the allocated socket.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Decodes and validates the session secrets.
    pub fn decode_secrets(&self) -> Result<PairingSecrets, ProtocolError> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::MissingHost);
        }

        let key_bytes = Zeroizing::new(decode_field("encryption_key", &self.encryption_key)?);
        let nonce_bytes = decode_field("nonce", &self.nonce)?;
        let header = Zeroizing::new(decode_field(
            "authentication_header",
            &self.authentication_header,
        )?);

        let key: [u8; KEY_LEN] =
            key_bytes
                .as_slice()
                .try_into()
                .map_err(|_| ProtocolError::InvalidLength {
                    field: "encryption_key",
                    expected: KEY_LEN,
                    actual: key_bytes.len(),
                })?;
        let nonce: [u8; NONCE_LEN] =
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| ProtocolError::InvalidLength {
                    field: "nonce",
                    expected: NONCE_LEN,
                    actual: nonce_bytes.len(),
                })?;

        Ok(PairingSecrets {
            key: Zeroizing::new(key),
            nonce,
            authentication_header: header,
        })
    }
}

/// Decoded per-session secrets. Wiped from memory on drop.
pub struct PairingSecrets {
    pub key: Zeroizing<[u8; KEY_LEN]>,
    pub nonce: [u8; NONCE_LEN],
    pub authentication_header: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for PairingSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingSecrets")
            .field("header_len", &self.authentication_header.len())
            .finish_non_exhaustive()
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(value.trim())
        .map_err(|_| ProtocolError::InvalidBase64 { field })
}
