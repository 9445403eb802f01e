use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of payload kinds the storage service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Asset,
    InvocationInput,
    InvocationOutput,
}

impl TransferKind {
    /// Path segment used by the link-submission and retrieve endpoints.
    pub fn segment(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::InvocationInput => "input",
            Self::InvocationOutput => "output",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asset => "asset",
            Self::InvocationInput => "invocation-input",
            Self::InvocationOutput => "invocation-output",
        })
    }
}

/// Which way the payload bytes travel over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
        })
    }
}

/// Identifies a model asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetIds {
    pub account_id: String,
    pub model_id: String,
    pub asset_id: String,
}

/// Identifies one input of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputIds {
    pub account_id: String,
    pub model_id: String,
    pub invocation_id: String,
    pub input_id: String,
}

/// Identifies one output of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputIds {
    pub account_id: String,
    pub model_id: String,
    pub invocation_id: String,
    pub output_id: String,
}
