//! The control-plane seam used by the transfer services.

use std::future::Future;
use std::pin::Pin;

use norman_protocol::{
    AssetDownloadRequest, AssetIds, ChecksumRequest, Direction, InputDownloadRequest, InputIds,
    OutputDownloadRequest, OutputIds, SocketPairingResponse, TrackedDownload, TransferKind,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::credential::Sensitive;
use crate::error::ApiError;
use crate::response::ApiResponse;

/// Boxed future returned by [`ControlPlane`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Characters left unescaped in path segments (RFC 3986 unreserved).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub(crate) fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Abstract control plane.
///
/// [`ApiClient`](crate::ApiClient) implements this over HTTP. Keeping it a
/// trait lets the transfer services run against mocks in tests.
pub trait ControlPlane: Send + Sync {
    /// Allocates a socket for one transfer.
    fn allocate_socket<'a>(
        &'a self,
        credential: &'a Sensitive,
        target: &'a SocketTarget,
    ) -> BoxFuture<'a, Result<SocketPairingResponse, ApiError>>;

    /// Reports an upload's digest. Sent exactly once per upload.
    fn complete_file_transfer<'a>(
        &'a self,
        credential: &'a Sensitive,
        request: &'a ChecksumRequest,
    ) -> BoxFuture<'a, Result<FinalizeOutcome, ApiError>>;

    /// Asks the service to fetch a payload from external links.
    fn submit_links<'a>(
        &'a self,
        credential: &'a Sensitive,
        submission: &'a LinkSubmission,
    ) -> BoxFuture<'a, Result<Vec<String>, ApiError>>;

    /// Returns the tracking record of a link download.
    fn get_download_metadata<'a>(
        &'a self,
        credential: &'a Sensitive,
        entity_id: &'a str,
    ) -> BoxFuture<'a, Result<TrackedDownload, ApiError>>;

    /// Direct identified read of a stored payload.
    fn retrieve<'a>(
        &'a self,
        credential: &'a Sensitive,
        target: &'a RetrieveTarget,
    ) -> BoxFuture<'a, Result<ApiResponse, ApiError>>;
}

/// Server verdict on an upload digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Verified,
    /// The service computed a different digest. `detail` is the response body.
    Mismatch { detail: String },
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// What a socket is allocated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketTarget {
    Asset { ids: AssetIds, file_size_in_bytes: u64 },
    Input { ids: InputIds, file_size_in_bytes: u64 },
    Output { ids: OutputIds },
}

impl SocketTarget {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Asset { .. } => TransferKind::Asset,
            Self::Input { .. } => TransferKind::InvocationInput,
            Self::Output { .. } => TransferKind::InvocationOutput,
        }
    }

    /// Assets and inputs are pushed; outputs are pulled.
    pub fn direction(&self) -> Direction {
        match self {
            Self::Asset { .. } | Self::Input { .. } => Direction::Upload,
            Self::Output { .. } => Direction::Download,
        }
    }

    /// Payload size announced at allocation. Only uploads declare one.
    pub fn declared_size(&self) -> Option<u64> {
        match self {
            Self::Asset {
                file_size_in_bytes, ..
            }
            | Self::Input {
                file_size_in_bytes, ..
            } => Some(*file_size_in_bytes),
            Self::Output { .. } => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Asset { .. } => "file-push/socket/pair/asset",
            Self::Input { .. } => "file-push/socket/pair/input",
            Self::Output { .. } => "file-pull/socket/pair/output",
        }
    }
}

/// A link submission for one payload kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSubmission {
    Asset(AssetDownloadRequest),
    Input(InputDownloadRequest),
    Output(OutputDownloadRequest),
}

impl LinkSubmission {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Asset(_) => TransferKind::Asset,
            Self::Input(_) => TransferKind::InvocationInput,
            Self::Output(_) => TransferKind::InvocationOutput,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Asset(_) => "file-pull/upload/assets",
            Self::Input(_) => "file-pull/upload/inputs",
            Self::Output(_) => "file-pull/upload/outputs",
        }
    }

    pub fn links(&self) -> &[String] {
        match self {
            Self::Asset(r) => &r.links,
            Self::Input(r) => &r.links,
            Self::Output(r) => &r.links,
        }
    }
}

/// A stored payload to read directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieveTarget {
    Asset(AssetIds),
    Input(InputIds),
    Output(OutputIds),
}

impl RetrieveTarget {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Asset(_) => TransferKind::Asset,
            Self::Input(_) => TransferKind::InvocationInput,
            Self::Output(_) => TransferKind::InvocationOutput,
        }
    }

    /// Relative URL path with every id percent-encoded.
    pub fn path(&self) -> String {
        let segments: Vec<&str> = match self {
            Self::Asset(ids) => vec![
                ids.account_id.as_str(),
                ids.model_id.as_str(),
                ids.asset_id.as_str(),
            ],
            Self::Input(ids) => vec![
                ids.account_id.as_str(),
                ids.model_id.as_str(),
                ids.invocation_id.as_str(),
                ids.input_id.as_str(),
            ],
            Self::Output(ids) => vec![
                ids.account_id.as_str(),
                ids.model_id.as_str(),
                ids.invocation_id.as_str(),
                ids.output_id.as_str(),
            ],
        };
        let mut path = format!("retrieve/{}", self.kind().segment());
        for segment in segments {
            path.push('/');
            path.push_str(&encode_segment(segment));
        }
        path
    }
}
