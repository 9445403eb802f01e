//! Transfer lifecycle.
//!
//! Every transfer walks `Requested -> Allocated -> Streaming`, then uploads
//! go through `Finalizing` before `Completed` while downloads complete
//! straight from `Streaming`. `Failed` is reachable from every
//! non-terminal state.

use std::fmt;

use norman_protocol::{Direction, TransferKind};
use norman_transfer::{Digest, TransferProgress};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::types::TransferEvent;

/// Capacity of the per-transfer progress channel.
const PROGRESS_BUFFER: usize = 64;

/// Lifecycle state of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Requested,
    Allocated,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is legal for a transfer moving in `direction`.
    pub fn can_transition_to(self, next: Self, direction: Direction) -> bool {
        use TransferState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        match (self, next) {
            (Requested, Allocated) | (Allocated, Streaming) => true,
            (Streaming, Finalizing) | (Finalizing, Completed) => direction == Direction::Upload,
            (Streaming, Completed) => direction == Direction::Download,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::Allocated => "allocated",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Drives one transfer through its states and reports each step.
#[derive(Debug)]
pub(crate) struct TransferTracker {
    transfer_id: Uuid,
    kind: TransferKind,
    direction: Direction,
    state: TransferState,
    events_tx: mpsc::Sender<TransferEvent>,
}

impl TransferTracker {
    pub(crate) fn new(
        kind: TransferKind,
        direction: Direction,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Self {
        let tracker = Self {
            transfer_id: Uuid::new_v4(),
            kind,
            direction,
            state: TransferState::Requested,
            events_tx,
        };
        debug!(transfer_id = %tracker.transfer_id, %kind, %direction, "transfer requested");
        tracker.emit(TransferEvent::StateChanged {
            transfer_id: tracker.transfer_id,
            state: TransferState::Requested,
        });
        tracker
    }

    pub(crate) fn id(&self) -> Uuid {
        self.transfer_id
    }

    pub(crate) fn state(&self) -> TransferState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: TransferState) -> Result<(), ServiceError> {
        if next == TransferState::Failed || !self.state.can_transition_to(next, self.direction) {
            return Err(ServiceError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(transfer_id = %self.transfer_id, from = %self.state, to = %next, "transfer state");
        self.state = next;
        self.emit(TransferEvent::StateChanged {
            transfer_id: self.transfer_id,
            state: next,
        });
        Ok(())
    }

    pub(crate) fn complete(&mut self, digest: Digest) -> Result<(), ServiceError> {
        self.advance(TransferState::Completed)?;
        self.emit(TransferEvent::Completed {
            transfer_id: self.transfer_id,
            digest,
        });
        info!(
            transfer_id = %self.transfer_id,
            kind = %self.kind,
            direction = %self.direction,
            %digest,
            "transfer completed"
        );
        Ok(())
    }

    /// Moves to `Failed`. No-op once terminal.
    pub(crate) fn fail(&mut self, err: &ServiceError) {
        if self.state.is_terminal() {
            return;
        }
        let from = self.state;
        self.state = TransferState::Failed;
        self.emit(TransferEvent::StateChanged {
            transfer_id: self.transfer_id,
            state: TransferState::Failed,
        });
        self.emit(TransferEvent::Failed {
            transfer_id: self.transfer_id,
            error: err.to_string(),
        });
        error!(
            transfer_id = %self.transfer_id,
            kind = %self.kind,
            direction = %self.direction,
            state = %from,
            error = %err,
            "transfer failed"
        );
    }

    /// Returns a sender whose updates are forwarded as
    /// [`TransferEvent::Progress`]. The forwarder stops when the sender drops.
    pub(crate) fn progress_sender(&self) -> mpsc::Sender<TransferProgress> {
        let (tx, mut rx) = mpsc::channel::<TransferProgress>(PROGRESS_BUFFER);
        let events_tx = self.events_tx.clone();
        let transfer_id = self.transfer_id;
        tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                let _ = events_tx.try_send(TransferEvent::Progress {
                    transfer_id,
                    bytes: p.bytes,
                    frames: p.frames,
                    total: p.total,
                });
            }
        });
        tx
    }

    fn emit(&self, event: TransferEvent) {
        // Dropped when nobody drains the receiver.
        let _ = self.events_tx.try_send(event);
    }
}
