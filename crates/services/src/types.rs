//! Events and results reported by the orchestrators.

use norman_transfer::Digest;
use uuid::Uuid;

use crate::state::TransferState;

/// Event emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The transfer entered a new state.
    StateChanged {
        transfer_id: Uuid,
        state: TransferState,
    },
    /// Bytes streamed so far.
    Progress {
        transfer_id: Uuid,
        bytes: u64,
        frames: u64,
        total: Option<u64>,
    },
    /// The transfer finished and its digest was accepted.
    Completed { transfer_id: Uuid, digest: Digest },
    /// The transfer was aborted.
    Failed { transfer_id: Uuid, error: String },
}

impl TransferEvent {
    pub fn transfer_id(&self) -> Uuid {
        match self {
            Self::StateChanged { transfer_id, .. }
            | Self::Progress { transfer_id, .. }
            | Self::Completed { transfer_id, .. }
            | Self::Failed { transfer_id, .. } => *transfer_id,
        }
    }
}

/// Outcome of a completed socket transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub pairing_id: String,
    pub digest: Digest,
}
