//! The public transfer surface.

use std::path::Path;
use std::sync::Arc;

use norman_api::{ApiClient, ControlPlane, LinkSubmission, Sensitive};
use norman_protocol::{
    AssetDownloadRequest, AssetIds, InputDownloadRequest, InputIds, OutputDownloadRequest,
    OutputIds, TrackedDownload,
};
use norman_transfer::Digest;
use tokio::io::AsyncRead;

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::pull::FilePull;
use crate::push::FilePush;
use crate::retrieve::Retrieve;
use crate::stream::ByteStream;

/// Uploads, downloads and direct reads against one control plane.
///
/// Holds no credential: every call takes the bearer token by reference.
pub struct NormanClient<C = ApiClient> {
    push: FilePush<C>,
    pull: FilePull<C>,
    retrieve: Retrieve<C>,
}

impl NormanClient<ApiClient> {
    /// Builds a client talking HTTP to `config.http.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let api = ApiClient::new(&config.http)?;
        Ok(Self::with_control_plane(Arc::new(api), config))
    }

    /// [`new`](Self::new) with defaults overridden from the environment.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::new(ClientConfig::from_env()?)
    }
}

impl<C: ControlPlane> NormanClient<C> {
    pub fn with_control_plane(control: Arc<C>, config: ClientConfig) -> Self {
        Self {
            push: FilePush::new(control.clone(), config.clone()),
            pull: FilePull::new(control.clone(), config),
            retrieve: Retrieve::new(control),
        }
    }

    /// Upload orchestrator, for events and cancellation.
    pub fn uploads(&mut self) -> &mut FilePush<C> {
        &mut self.push
    }

    /// Download orchestrator, for events and cancellation.
    pub fn downloads(&mut self) -> &mut FilePull<C> {
        &mut self.pull
    }

    pub async fn push_asset(
        &self,
        credential: &Sensitive,
        ids: &AssetIds,
        path: &Path,
    ) -> Result<Digest, ServiceError> {
        Ok(self.push.push_asset(credential, ids, path).await?.digest)
    }

    pub async fn push_asset_stream<R: AsyncRead + Unpin>(
        &self,
        credential: &Sensitive,
        ids: &AssetIds,
        source: R,
        size: u64,
    ) -> Result<Digest, ServiceError> {
        Ok(self
            .push
            .push_asset_stream(credential, ids, source, size)
            .await?
            .digest)
    }

    pub async fn push_input(
        &self,
        credential: &Sensitive,
        ids: &InputIds,
        path: &Path,
    ) -> Result<Digest, ServiceError> {
        Ok(self.push.push_input(credential, ids, path).await?.digest)
    }

    pub async fn push_input_stream<R: AsyncRead + Unpin>(
        &self,
        credential: &Sensitive,
        ids: &InputIds,
        source: R,
        size: u64,
    ) -> Result<Digest, ServiceError> {
        Ok(self
            .push
            .push_input_stream(credential, ids, source, size)
            .await?
            .digest)
    }

    /// Streams an invocation output through an allocated socket.
    pub async fn pull_output(
        &self,
        credential: &Sensitive,
        ids: &OutputIds,
    ) -> Result<ByteStream, ServiceError> {
        self.pull.pull_output(credential, ids).await
    }

    pub async fn get_model_asset(
        &self,
        credential: &Sensitive,
        ids: &AssetIds,
    ) -> Result<ByteStream, ServiceError> {
        self.retrieve.get_model_asset(credential, ids).await
    }

    pub async fn get_invocation_input(
        &self,
        credential: &Sensitive,
        ids: &InputIds,
    ) -> Result<ByteStream, ServiceError> {
        self.retrieve.get_invocation_input(credential, ids).await
    }

    /// Reads a stored invocation output over HTTP.
    pub async fn get_invocation_output(
        &self,
        credential: &Sensitive,
        ids: &OutputIds,
    ) -> Result<ByteStream, ServiceError> {
        self.retrieve.get_invocation_output(credential, ids).await
    }

    pub async fn submit_asset_links(
        &self,
        credential: &Sensitive,
        request: AssetDownloadRequest,
    ) -> Result<Vec<String>, ServiceError> {
        self.pull
            .submit_links(credential, &LinkSubmission::Asset(request))
            .await
    }

    pub async fn submit_input_links(
        &self,
        credential: &Sensitive,
        request: InputDownloadRequest,
    ) -> Result<Vec<String>, ServiceError> {
        self.pull
            .submit_links(credential, &LinkSubmission::Input(request))
            .await
    }

    pub async fn submit_output_links(
        &self,
        credential: &Sensitive,
        request: OutputDownloadRequest,
    ) -> Result<Vec<String>, ServiceError> {
        self.pull
            .submit_links(credential, &LinkSubmission::Output(request))
            .await
    }

    pub async fn get_download_metadata(
        &self,
        credential: &Sensitive,
        entity_id: &str,
    ) -> Result<TrackedDownload, ServiceError> {
        self.pull.get_download_metadata(credential, entity_id).await
    }
}
