use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AssetIds, InputIds, OutputIds};

// ---------------------------------------------------------------------------
// Socket pairing (allocation) requests
// ---------------------------------------------------------------------------

/// Allocates an upload socket for a model asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAssetPairingRequest {
    pub account_id: String,
    pub model_id: String,
    pub asset_id: String,
    pub file_size_in_bytes: u64,
}

impl SocketAssetPairingRequest {
    pub fn new(ids: &AssetIds, file_size_in_bytes: u64) -> Self {
        Self {
            account_id: ids.account_id.clone(),
            model_id: ids.model_id.clone(),
            asset_id: ids.asset_id.clone(),
            file_size_in_bytes,
        }
    }
}

/// Allocates an upload socket for an invocation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketInputPairingRequest {
    pub account_id: String,
    pub model_id: String,
    pub invocation_id: String,
    pub input_id: String,
    pub file_size_in_bytes: u64,
}

impl SocketInputPairingRequest {
    pub fn new(ids: &InputIds, file_size_in_bytes: u64) -> Self {
        Self {
            account_id: ids.account_id.clone(),
            model_id: ids.model_id.clone(),
            invocation_id: ids.invocation_id.clone(),
            input_id: ids.input_id.clone(),
            file_size_in_bytes,
        }
    }
}

/// Allocates a download socket for an invocation output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOutputPairingRequest {
    pub account_id: String,
    pub model_id: String,
    pub invocation_id: String,
    pub output_id: String,
}

impl From<&OutputIds> for SocketOutputPairingRequest {
    fn from(ids: &OutputIds) -> Self {
        Self {
            account_id: ids.account_id.clone(),
            model_id: ids.model_id.clone(),
            invocation_id: ids.invocation_id.clone(),
            output_id: ids.output_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Reports the plaintext digest of a finished upload.
///
/// `checksum` is the XXH3-64 digest as 16 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRequest {
    pub pairing_id: String,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Link submission
// ---------------------------------------------------------------------------

/// Asks the service to fetch an asset from external links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDownloadRequest {
    pub account_id: String,
    pub model_id: String,
    pub asset_id: String,
    pub links: Vec<String>,
}

/// Asks the service to fetch an invocation input from external links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDownloadRequest {
    pub account_id: String,
    pub model_id: String,
    pub signature_id: String,
    pub invocation_id: String,
    pub input_id: String,
    pub links: Vec<String>,
}

/// Asks the service to fetch an invocation output from external links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDownloadRequest {
    pub account_id: String,
    pub model_id: String,
    pub signature_id: String,
    pub invocation_id: String,
    pub output_id: String,
    pub links: Vec<String>,
}

// ---------------------------------------------------------------------------
// Download metadata
// ---------------------------------------------------------------------------

/// Server-side record of a link download.
///
/// Fields this client does not interpret are kept in `extra` so the
/// descriptor survives a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDownload {
    pub id: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}
