//! Direct identified reads of stored payloads.
//!
//! No socket is allocated: the payload is read straight from the HTTP
//! response body, chunk by chunk.

use std::sync::Arc;

use norman_api::{ApiResponse, ControlPlane, RetrieveTarget, Sensitive};
use norman_protocol::{AssetIds, InputIds, OutputIds};
use tracing::debug;

use crate::error::ServiceError;
use crate::orchestrator::check_credential;
use crate::stream::ByteStream;

pub struct Retrieve<C> {
    control: Arc<C>,
}

impl<C: ControlPlane> Retrieve<C> {
    pub fn new(control: Arc<C>) -> Self {
        Self { control }
    }

    pub async fn get_model_asset(
        &self,
        credential: &Sensitive,
        ids: &AssetIds,
    ) -> Result<ByteStream, ServiceError> {
        self.get(credential, &RetrieveTarget::Asset(ids.clone())).await
    }

    pub async fn get_invocation_input(
        &self,
        credential: &Sensitive,
        ids: &InputIds,
    ) -> Result<ByteStream, ServiceError> {
        self.get(credential, &RetrieveTarget::Input(ids.clone())).await
    }

    pub async fn get_invocation_output(
        &self,
        credential: &Sensitive,
        ids: &OutputIds,
    ) -> Result<ByteStream, ServiceError> {
        self.get(credential, &RetrieveTarget::Output(ids.clone())).await
    }

    /// Opens the payload behind `target` as a lazy byte stream.
    pub async fn get(
        &self,
        credential: &Sensitive,
        target: &RetrieveTarget,
    ) -> Result<ByteStream, ServiceError> {
        check_credential(credential)?;
        match self.control.retrieve(credential, target).await? {
            ApiResponse::Stream(body) => {
                debug!(
                    kind = %target.kind(),
                    content_length = ?body.content_length(),
                    "retrieve stream opened"
                );
                Ok(ByteStream::Http(body))
            }
            other => Err(ServiceError::UnexpectedResponse(format!(
                "retrieve returned a buffered {:?} body",
                other.encoding()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockControlPlane, asset_ids, input_ids};
    use norman_api::{ApiClient, HttpConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering with a chunked body. Returns the
    /// request line it received.
    async fn chunked_server(chunks: Vec<&'static str>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v0/", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut data = Vec::new();
            while !data.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
            }

            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
            let _ = stream.write_all(head.as_bytes()).await;
            for chunk in chunks {
                let part = format!("{:x}\r\n{chunk}\r\n", chunk.len());
                let _ = stream.write_all(part.as_bytes()).await;
                let _ = stream.flush().await;
            }
            let _ = stream.write_all(b"0\r\n\r\n").await;
            let _ = stream.shutdown().await;

            let request = String::from_utf8_lossy(&data).into_owned();
            request.lines().next().unwrap_or_default().to_string()
        });

        (url, handle)
    }

    fn api(url: &str) -> Arc<ApiClient> {
        Arc::new(
            ApiClient::new(&HttpConfig {
                base_url: url.into(),
                timeout_secs: 5,
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn get_model_asset_streams_body() {
        let (url, server) = chunked_server(vec!["weights-", "part-2"]).await;
        let retrieve = Retrieve::new(api(&url));

        let mut stream = retrieve
            .get_model_asset(&Sensitive::new("tok"), &asset_ids())
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            assert!(!chunk.is_empty());
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"weights-part-2");
        assert_eq!(stream.received(), 14);

        let request_line = server.await.unwrap();
        assert_eq!(request_line, "GET /v0/retrieve/asset/acc/model-1/asset-1 HTTP/1.1");
    }

    #[tokio::test]
    async fn early_drop_releases_response() {
        let (url, server) = chunked_server(vec!["one", "two", "three"]).await;
        let retrieve = Retrieve::new(api(&url));

        let mut stream = retrieve
            .get_invocation_input(&Sensitive::new("tok"), &input_ids())
            .await
            .unwrap();
        assert!(stream.next_chunk().await.unwrap().is_some());
        drop(stream);

        let request_line = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(request_line.starts_with("GET /v0/retrieve/input/"));
    }

    #[tokio::test]
    async fn buffered_body_is_rejected() {
        let control = Arc::new(MockControlPlane::new());
        let retrieve = Retrieve::new(control.clone());
        let err = retrieve
            .get_model_asset(&Sensitive::new("tok"), &asset_ids())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn blank_credential_fails() {
        let control = Arc::new(MockControlPlane::new());
        let retrieve = Retrieve::new(control.clone());
        let err = retrieve
            .get_model_asset(&Sensitive::new(""), &asset_ids())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Credential(_)));
        assert_eq!(control.retrieves(), 0);
    }
}
