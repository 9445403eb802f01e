//! Control-plane HTTP client.
//!
//! Async client using `reqwest` with Bearer token authentication. The token
//! is passed into every call and attached per request; the client itself
//! holds no credential.

use std::time::Duration;

use norman_protocol::{
    ChecksumRequest, SocketAssetPairingRequest, SocketInputPairingRequest,
    SocketOutputPairingRequest, SocketPairingResponse, TrackedDownload,
};
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::HttpConfig;
use crate::control::{
    BoxFuture, ControlPlane, FinalizeOutcome, LinkSubmission, RetrieveTarget, SocketTarget,
    encode_segment,
};
use crate::credential::Sensitive;
use crate::error::ApiError;
use crate::response::{ApiResponse, ResponseEncoding};

/// Error bodies longer than this are cut before they reach an error value.
const MAX_ERROR_BODY: usize = 1024;

/// Control-plane API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &HttpConfig) -> Result<Self, ApiError> {
        config.validate()?;
        // Only connecting is bounded client-wide; streaming reads may run long.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.normalized_base(),
            timeout: config.timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs an authenticated request and decodes the body as `encoding`.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        credential: &Sensitive,
        body: Option<&B>,
        encoding: ResponseEncoding,
    ) -> Result<ApiResponse, ApiError> {
        let auth = credential.authorization()?;
        let url = format!("{}{}", self.base_url, path);

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(AUTHORIZATION, auth);
        if encoding != ResponseEncoding::Stream {
            req = req.timeout(self.timeout);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        debug!(%method, path, status = status.as_u16(), "control plane response");

        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate(&mut body, MAX_ERROR_BODY);
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        ApiResponse::read(resp, encoding).await
    }

    /// POSTs `body` as JSON and decodes a JSON response.
    pub async fn post_json<B, T>(
        &self,
        path: &str,
        credential: &Sensitive,
        body: &B,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, credential, Some(body), ResponseEncoding::Json)
            .await?
            .into_json()
    }

    /// GETs `path` and decodes a JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &Sensitive,
    ) -> Result<T, ApiError> {
        self.request::<()>(Method::GET, path, credential, None, ResponseEncoding::Json)
            .await?
            .into_json()
    }

    async fn allocate(
        &self,
        credential: &Sensitive,
        target: &SocketTarget,
    ) -> Result<SocketPairingResponse, ApiError> {
        let path = target.path();
        let pairing: SocketPairingResponse = match target {
            SocketTarget::Asset {
                ids,
                file_size_in_bytes,
            } => {
                let body = SocketAssetPairingRequest::new(ids, *file_size_in_bytes);
                self.post_json(path, credential, &body).await?
            }
            SocketTarget::Input {
                ids,
                file_size_in_bytes,
            } => {
                let body = SocketInputPairingRequest::new(ids, *file_size_in_bytes);
                self.post_json(path, credential, &body).await?
            }
            SocketTarget::Output { ids } => {
                let body = SocketOutputPairingRequest::from(ids);
                self.post_json(path, credential, &body).await?
            }
        };
        debug!(kind = %target.kind(), pairing_id = %pairing.pairing_id, "socket allocated");
        Ok(pairing)
    }

    async fn complete(
        &self,
        credential: &Sensitive,
        request: &ChecksumRequest,
    ) -> Result<FinalizeOutcome, ApiError> {
        let result = self
            .request(
                Method::POST,
                "file-push/socket/complete",
                credential,
                Some(request),
                ResponseEncoding::Text,
            )
            .await;

        match result {
            Ok(_) => Ok(FinalizeOutcome::Verified),
            Err(ApiError::Api { status, body }) if status == 409 || status == 422 => {
                Ok(FinalizeOutcome::Mismatch { detail: body })
            }
            Err(e) => Err(e),
        }
    }

    async fn submit(
        &self,
        credential: &Sensitive,
        submission: &LinkSubmission,
    ) -> Result<Vec<String>, ApiError> {
        let path = submission.path();
        match submission {
            LinkSubmission::Asset(body) => self.post_json(path, credential, body).await,
            LinkSubmission::Input(body) => self.post_json(path, credential, body).await,
            LinkSubmission::Output(body) => self.post_json(path, credential, body).await,
        }
    }
}

impl ControlPlane for ApiClient {
    fn allocate_socket<'a>(
        &'a self,
        credential: &'a Sensitive,
        target: &'a SocketTarget,
    ) -> BoxFuture<'a, Result<SocketPairingResponse, ApiError>> {
        Box::pin(self.allocate(credential, target))
    }

    fn complete_file_transfer<'a>(
        &'a self,
        credential: &'a Sensitive,
        request: &'a ChecksumRequest,
    ) -> BoxFuture<'a, Result<FinalizeOutcome, ApiError>> {
        Box::pin(self.complete(credential, request))
    }

    fn submit_links<'a>(
        &'a self,
        credential: &'a Sensitive,
        submission: &'a LinkSubmission,
    ) -> BoxFuture<'a, Result<Vec<String>, ApiError>> {
        Box::pin(self.submit(credential, submission))
    }

    fn get_download_metadata<'a>(
        &'a self,
        credential: &'a Sensitive,
        entity_id: &'a str,
    ) -> BoxFuture<'a, Result<TrackedDownload, ApiError>> {
        Box::pin(async move {
            let path = format!("file-pull/metadata/{}", encode_segment(entity_id));
            self.get_json(&path, credential).await
        })
    }

    fn retrieve<'a>(
        &'a self,
        credential: &'a Sensitive,
        target: &'a RetrieveTarget,
    ) -> BoxFuture<'a, Result<ApiResponse, ApiError>> {
        Box::pin(async move {
            self.request::<()>(
                Method::GET,
                &target.path(),
                credential,
                None,
                ResponseEncoding::Stream,
            )
            .await
        })
    }
}

fn truncate(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}
