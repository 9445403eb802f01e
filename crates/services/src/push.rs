//! Upload orchestrator.
//!
//! Allocates a socket, streams the payload through it while digesting, then
//! reports the digest to the control plane exactly once.

use std::path::Path;
use std::sync::Arc;

use norman_api::{ControlPlane, FinalizeOutcome, Sensitive, SocketTarget};
use norman_protocol::{AssetIds, ChecksumRequest, Direction, InputIds};
use norman_socket::write_and_digest;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::orchestrator::{Orchestrator, check_credential};
use crate::state::{TransferState, TransferTracker};
use crate::types::{TransferEvent, TransferReceipt};

/// Pushes assets and invocation inputs to the storage service.
pub struct FilePush<C> {
    core: Orchestrator<C>,
}

impl<C: ControlPlane> FilePush<C> {
    pub fn new(control: Arc<C>, config: ClientConfig) -> Self {
        Self {
            core: Orchestrator::new(control, config),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.core.take_events()
    }

    /// Cancelling this token aborts every running upload. Uploads started
    /// after that are unaffected and use a fresh token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.core.cancel_token()
    }

    pub async fn push_asset(
        &self,
        credential: &Sensitive,
        ids: &AssetIds,
        path: &Path,
    ) -> Result<TransferReceipt, ServiceError> {
        check_credential(credential)?;
        let (file, size) = open_source(path).await?;
        self.push_asset_stream(credential, ids, file, size).await
    }

    /// Uploads `size` bytes read from `source` as a model asset.
    pub async fn push_asset_stream<R: AsyncRead + Unpin>(
        &self,
        credential: &Sensitive,
        ids: &AssetIds,
        source: R,
        size: u64,
    ) -> Result<TransferReceipt, ServiceError> {
        let target = SocketTarget::Asset {
            ids: ids.clone(),
            file_size_in_bytes: size,
        };
        self.push(credential, &target, source).await
    }

    pub async fn push_input(
        &self,
        credential: &Sensitive,
        ids: &InputIds,
        path: &Path,
    ) -> Result<TransferReceipt, ServiceError> {
        check_credential(credential)?;
        let (file, size) = open_source(path).await?;
        self.push_input_stream(credential, ids, file, size).await
    }

    /// Uploads `size` bytes read from `source` as an invocation input.
    /// Any in-memory primitive can be pushed through a byte slice.
    pub async fn push_input_stream<R: AsyncRead + Unpin>(
        &self,
        credential: &Sensitive,
        ids: &InputIds,
        source: R,
        size: u64,
    ) -> Result<TransferReceipt, ServiceError> {
        let target = SocketTarget::Input {
            ids: ids.clone(),
            file_size_in_bytes: size,
        };
        self.push(credential, &target, source).await
    }

    /// Runs one upload end to end.
    pub async fn push<R: AsyncRead + Unpin>(
        &self,
        credential: &Sensitive,
        target: &SocketTarget,
        source: R,
    ) -> Result<TransferReceipt, ServiceError> {
        check_credential(credential)?;
        if target.direction() != Direction::Upload {
            return Err(ServiceError::InvalidRequest(format!(
                "{} payloads cannot be pushed",
                target.kind()
            )));
        }

        let (mut tracker, cancel) = self.core.begin(target.kind(), Direction::Upload);
        info!(transfer_id = %tracker.id(), kind = %target.kind(), "upload started");

        match self.run(credential, target, source, &mut tracker, &cancel).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn run<R: AsyncRead + Unpin>(
        &self,
        credential: &Sensitive,
        target: &SocketTarget,
        source: R,
        tracker: &mut TransferTracker,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, ServiceError> {
        let pairing = self.core.allocate(credential, target, cancel).await?;
        tracker.advance(TransferState::Allocated)?;

        let (session, channel) = self
            .core
            .connect(&pairing, target.kind(), Direction::Upload, cancel)
            .await?;
        let session = match target.declared_size() {
            Some(size) => session.with_declared_size(size),
            None => session,
        };
        tracker.advance(TransferState::Streaming)?;

        let progress = tracker.progress_sender();
        let digest = write_and_digest(channel, &session, source, Some(progress), cancel).await?;
        tracker.advance(TransferState::Finalizing)?;

        // No finalize once cancelled.
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        // Finalize is not interrupted: once sent, the service's verdict
        // decides the outcome even if a cancel arrives meanwhile.
        let request = ChecksumRequest {
            pairing_id: session.session_id.clone(),
            checksum: digest.to_hex(),
        };
        match self
            .core
            .control
            .complete_file_transfer(credential, &request)
            .await?
        {
            FinalizeOutcome::Verified => {}
            FinalizeOutcome::Mismatch { detail } => {
                warn!(
                    transfer_id = %tracker.id(),
                    pairing_id = %session.session_id,
                    %digest,
                    "service reported a checksum mismatch"
                );
                return Err(ServiceError::DigestMismatch { digest, detail });
            }
        }

        tracker.complete(digest)?;
        Ok(TransferReceipt {
            transfer_id: tracker.id(),
            pairing_id: session.session_id.clone(),
            digest,
        })
    }
}

async fn open_source(path: &Path) -> Result<(tokio::fs::File, u64), ServiceError> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}
