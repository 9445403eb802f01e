//! Test doubles shared by the orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use norman_api::{
    ApiError, ApiResponse, BoxFuture, ControlPlane, FinalizeOutcome, LinkSubmission,
    RetrieveTarget, Sensitive, SocketTarget,
};
use norman_protocol::{
    AssetIds, ChecksumRequest, InputIds, OutputIds, SocketPairingResponse, TrackedDownload,
};
use norman_transfer::IoConfig;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::retry::RetryPolicy;

/// Control plane that serves queued pairings and records every call.
#[derive(Default)]
pub(crate) struct MockControlPlane {
    pairings: Mutex<VecDeque<Result<SocketPairingResponse, ApiError>>>,
    allocations: Mutex<Vec<SocketTarget>>,
    expected_checksum: Mutex<Option<String>>,
    finalized: Mutex<Vec<ChecksumRequest>>,
    cancel_on_finalize: Mutex<Option<CancellationToken>>,
    submissions: AtomicUsize,
    retrieves: AtomicUsize,
}

impl MockControlPlane {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_pairing(&self, pairing: Result<SocketPairingResponse, ApiError>) {
        self.pairings.lock().unwrap().push_back(pairing);
    }

    /// Finalize answers `Mismatch` for any other checksum.
    pub(crate) fn expect_checksum(&self, checksum: String) {
        *self.expected_checksum.lock().unwrap() = Some(checksum);
    }

    /// Cancels `token` while the finalize call is in flight.
    pub(crate) fn cancel_on_finalize(&self, token: CancellationToken) {
        *self.cancel_on_finalize.lock().unwrap() = Some(token);
    }

    pub(crate) fn allocations(&self) -> usize {
        self.allocations.lock().unwrap().len()
    }

    pub(crate) fn allocated_targets(&self) -> Vec<SocketTarget> {
        self.allocations.lock().unwrap().clone()
    }

    pub(crate) fn allocated_sizes(&self) -> Vec<u64> {
        self.allocations
            .lock()
            .unwrap()
            .iter()
            .filter_map(SocketTarget::declared_size)
            .collect()
    }

    pub(crate) fn finalized(&self) -> Vec<ChecksumRequest> {
        self.finalized.lock().unwrap().clone()
    }

    pub(crate) fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub(crate) fn retrieves(&self) -> usize {
        self.retrieves.load(Ordering::SeqCst)
    }
}

impl ControlPlane for MockControlPlane {
    fn allocate_socket<'a>(
        &'a self,
        _credential: &'a Sensitive,
        target: &'a SocketTarget,
    ) -> BoxFuture<'a, Result<SocketPairingResponse, ApiError>> {
        self.allocations.lock().unwrap().push(target.clone());
        let next = self.pairings.lock().unwrap().pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| Err(ApiError::UnexpectedResponse("no pairing queued".into())))
        })
    }

    fn complete_file_transfer<'a>(
        &'a self,
        _credential: &'a Sensitive,
        request: &'a ChecksumRequest,
    ) -> BoxFuture<'a, Result<FinalizeOutcome, ApiError>> {
        self.finalized.lock().unwrap().push(request.clone());
        if let Some(token) = self.cancel_on_finalize.lock().unwrap().take() {
            token.cancel();
        }
        let expected = self.expected_checksum.lock().unwrap().clone();
        Box::pin(async move {
            match expected {
                Some(c) if c != request.checksum => Ok(FinalizeOutcome::Mismatch {
                    detail: "checksum mismatch".into(),
                }),
                _ => Ok(FinalizeOutcome::Verified),
            }
        })
    }

    fn submit_links<'a>(
        &'a self,
        _credential: &'a Sensitive,
        submission: &'a LinkSubmission,
    ) -> BoxFuture<'a, Result<Vec<String>, ApiError>> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let ids = (0..submission.links().len())
            .map(|i| format!("dl-{i}"))
            .collect();
        Box::pin(async move { Ok(ids) })
    }

    fn get_download_metadata<'a>(
        &'a self,
        _credential: &'a Sensitive,
        entity_id: &'a str,
    ) -> BoxFuture<'a, Result<TrackedDownload, ApiError>> {
        Box::pin(async move {
            let json = serde_json::json!({
                "id": "tracked-1",
                "entity_id": entity_id,
                "status": "Finished",
            });
            Ok(serde_json::from_value(json)?)
        })
    }

    fn retrieve<'a>(
        &'a self,
        _credential: &'a Sensitive,
        _target: &'a RetrieveTarget,
    ) -> BoxFuture<'a, Result<ApiResponse, ApiError>> {
        self.retrieves.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(ApiResponse::Text("not a stream".into())) })
    }
}

/// Config with `chunk_size` and a fast retry policy.
pub(crate) fn test_config(chunk_size: usize) -> ClientConfig {
    ClientConfig {
        io: IoConfig {
            chunk_size,
            ..IoConfig::default()
        },
        retry: RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..RetryPolicy::default()
        },
        ..ClientConfig::default()
    }
}

pub(crate) fn asset_ids() -> AssetIds {
    AssetIds {
        account_id: "acc".into(),
        model_id: "model-1".into(),
        asset_id: "asset-1".into(),
    }
}

pub(crate) fn input_ids() -> InputIds {
    InputIds {
        account_id: "acc".into(),
        model_id: "model-1".into(),
        invocation_id: "inv-1".into(),
        input_id: "input-1".into(),
    }
}

pub(crate) fn output_ids() -> OutputIds {
    OutputIds {
        account_id: "acc".into(),
        model_id: "model-1".into(),
        invocation_id: "inv-1".into(),
        output_id: "output-1".into(),
    }
}
