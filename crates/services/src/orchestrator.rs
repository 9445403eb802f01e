//! Shared plumbing for the push and pull orchestrators.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use norman_api::{ControlPlane, Sensitive, SocketTarget};
use norman_protocol::{Direction, SocketPairingResponse, TransferKind};
use norman_socket::{SocketChannel, TransferSession};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::retry::with_retry;
use crate::state::TransferTracker;
use crate::types::TransferEvent;

/// Capacity of the orchestrator event channel.
const EVENT_BUFFER: usize = 256;

pub(crate) struct Orchestrator<C> {
    pub(crate) control: Arc<C>,
    pub(crate) config: ClientConfig,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: Mutex<CancellationToken>,
}

impl<C: ControlPlane> Orchestrator<C> {
    pub(crate) fn new(control: Arc<C>, config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            control,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub(crate) fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Token covering the running transfers and those started until it is
    /// cancelled.
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.current_cancel().clone()
    }

    /// Starts tracking a new transfer with its own child cancellation token.
    ///
    /// A cancelled parent only stops the transfers it already covered: the
    /// next transfer starts a fresh generation.
    pub(crate) fn begin(
        &self,
        kind: TransferKind,
        direction: Direction,
    ) -> (TransferTracker, CancellationToken) {
        let child = {
            let mut cancel = self.current_cancel();
            if cancel.is_cancelled() {
                debug!("previous cancellation consumed, starting a new generation");
                *cancel = CancellationToken::new();
            }
            cancel.child_token()
        };
        (
            TransferTracker::new(kind, direction, self.events_tx.clone()),
            child,
        )
    }

    fn current_cancel(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a socket, retrying transient control-plane failures.
    pub(crate) async fn allocate(
        &self,
        credential: &Sensitive,
        target: &SocketTarget,
        cancel: &CancellationToken,
    ) -> Result<SocketPairingResponse, ServiceError> {
        let control = &*self.control;
        let pairing = with_retry(&self.config.retry, cancel, "allocate_socket", || {
            control.allocate_socket(credential, target)
        })
        .await?;
        debug!(kind = %target.kind(), pairing_id = %pairing.pairing_id, "socket allocated");
        Ok(pairing)
    }

    /// Decodes the pairing and opens the socket.
    pub(crate) async fn connect(
        &self,
        pairing: &SocketPairingResponse,
        kind: TransferKind,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<(TransferSession, SocketChannel<TcpStream>), ServiceError> {
        let session =
            TransferSession::from_pairing(pairing, kind, direction, self.config.io.chunk_size)?;
        let channel = norman_socket::client::connect(&session, &self.config.io, cancel).await?;
        info!(
            pairing_id = %session.session_id,
            endpoint = %session.endpoint,
            %kind,
            %direction,
            "socket connected"
        );
        Ok((session, channel))
    }
}

/// Rejects a blank credential before any network activity.
pub(crate) fn check_credential(credential: &Sensitive) -> Result<(), ServiceError> {
    if credential.is_present() {
        Ok(())
    } else {
        Err(ServiceError::Credential("missing bearer token"))
    }
}
