//! Download orchestrator, link submission and download metadata.

use std::sync::Arc;

use norman_api::{ControlPlane, LinkSubmission, Sensitive, SocketTarget};
use norman_protocol::{Direction, OutputIds, TrackedDownload};
use norman_socket::{DownloadStream, open_download, read_and_digest};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::orchestrator::{Orchestrator, check_credential};
use crate::state::{TransferState, TransferTracker};
use crate::stream::{ByteStream, SocketDownload};
use crate::types::{TransferEvent, TransferReceipt};

/// Pulls invocation outputs from the storage service and asks it to fetch
/// payloads from external links.
pub struct FilePull<C> {
    core: Orchestrator<C>,
}

impl<C: ControlPlane> FilePull<C> {
    pub fn new(control: Arc<C>, config: ClientConfig) -> Self {
        Self {
            core: Orchestrator::new(control, config),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.core.take_events()
    }

    /// Cancelling this token aborts every running download, including
    /// streams already handed out. Later downloads use a fresh token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.core.cancel_token()
    }

    /// Opens an output download as a lazy byte stream.
    ///
    /// The transfer completes when the stream is read to the end. If the
    /// service announced a size or checksum, both are verified then.
    pub async fn pull_output(
        &self,
        credential: &Sensitive,
        ids: &OutputIds,
    ) -> Result<ByteStream, ServiceError> {
        check_credential(credential)?;
        let target = SocketTarget::Output { ids: ids.clone() };
        let (mut tracker, cancel) = self.core.begin(target.kind(), Direction::Download);
        info!(transfer_id = %tracker.id(), kind = %target.kind(), "download started");

        match self.open(credential, &target, &mut tracker, cancel).await {
            Ok(stream) => Ok(ByteStream::Socket(SocketDownload::new(stream, tracker))),
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Downloads an output into `sink` and returns once it is verified.
    pub async fn pull_output_to<W: AsyncWrite + Unpin>(
        &self,
        credential: &Sensitive,
        ids: &OutputIds,
        sink: W,
    ) -> Result<TransferReceipt, ServiceError> {
        check_credential(credential)?;
        let target = SocketTarget::Output { ids: ids.clone() };
        let (mut tracker, cancel) = self.core.begin(target.kind(), Direction::Download);
        info!(transfer_id = %tracker.id(), kind = %target.kind(), "download started");

        match self
            .receive(credential, &target, sink, &mut tracker, &cancel)
            .await
        {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Asks the service to fetch a payload from external links. Returns
    /// the ids of the tracked downloads.
    pub async fn submit_links(
        &self,
        credential: &Sensitive,
        submission: &LinkSubmission,
    ) -> Result<Vec<String>, ServiceError> {
        check_credential(credential)?;
        if submission.links().is_empty() {
            return Err(ServiceError::InvalidRequest("no links to submit".into()));
        }
        let ids = self
            .core
            .control
            .submit_links(credential, submission)
            .await?;
        info!(
            kind = %submission.kind(),
            links = submission.links().len(),
            downloads = ids.len(),
            "links submitted"
        );
        Ok(ids)
    }

    pub async fn get_download_metadata(
        &self,
        credential: &Sensitive,
        entity_id: &str,
    ) -> Result<TrackedDownload, ServiceError> {
        check_credential(credential)?;
        Ok(self
            .core
            .control
            .get_download_metadata(credential, entity_id)
            .await?)
    }

    async fn open(
        &self,
        credential: &Sensitive,
        target: &SocketTarget,
        tracker: &mut TransferTracker,
        cancel: CancellationToken,
    ) -> Result<DownloadStream, ServiceError> {
        let pairing = self.core.allocate(credential, target, &cancel).await?;
        tracker.advance(TransferState::Allocated)?;

        let (session, channel) = self
            .core
            .connect(&pairing, target.kind(), Direction::Download, &cancel)
            .await?;
        let stream = open_download(channel, &session, cancel).await?;
        tracker.advance(TransferState::Streaming)?;
        Ok(stream.with_progress(tracker.progress_sender()))
    }

    async fn receive<W: AsyncWrite + Unpin>(
        &self,
        credential: &Sensitive,
        target: &SocketTarget,
        sink: W,
        tracker: &mut TransferTracker,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, ServiceError> {
        let pairing = self.core.allocate(credential, target, cancel).await?;
        tracker.advance(TransferState::Allocated)?;

        let (session, channel) = self
            .core
            .connect(&pairing, target.kind(), Direction::Download, cancel)
            .await?;
        tracker.advance(TransferState::Streaming)?;

        let progress = tracker.progress_sender();
        let digest = read_and_digest(channel, &session, sink, Some(progress), cancel).await?;
        tracker.complete(digest)?;

        Ok(TransferReceipt {
            transfer_id: tracker.id(),
            pairing_id: session.session_id.clone(),
            digest,
        })
    }
}
