//! Response bodies as a tagged variant.

use std::fmt;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// How a response body should be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEncoding {
    Json,
    Text,
    Bytes,
    /// Leave the body on the wire and read it chunk by chunk.
    Stream,
}

/// A decoded (or still streaming) response body.
pub enum ApiResponse {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
    Stream(HttpByteStream),
}

impl fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
        }
    }
}

impl ApiResponse {
    /// Consumes `resp` according to `encoding`.
    pub async fn read(resp: reqwest::Response, encoding: ResponseEncoding) -> Result<Self, ApiError> {
        Ok(match encoding {
            ResponseEncoding::Json => {
                let bytes = resp.bytes().await?;
                if bytes.is_empty() {
                    Self::Json(serde_json::Value::Null)
                } else {
                    Self::Json(serde_json::from_slice(&bytes)?)
                }
            }
            ResponseEncoding::Text => Self::Text(resp.text().await?),
            ResponseEncoding::Bytes => Self::Bytes(resp.bytes().await?.to_vec()),
            ResponseEncoding::Stream => Self::Stream(HttpByteStream::new(resp)),
        })
    }

    pub fn encoding(&self) -> ResponseEncoding {
        match self {
            Self::Json(_) => ResponseEncoding::Json,
            Self::Text(_) => ResponseEncoding::Text,
            Self::Bytes(_) => ResponseEncoding::Bytes,
            Self::Stream(_) => ResponseEncoding::Stream,
        }
    }

    /// Deserializes a buffered body. A streaming body is an error.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            Self::Json(v) => Ok(serde_json::from_value(v)?),
            Self::Text(s) => Ok(serde_json::from_str(&s)?),
            Self::Bytes(b) => Ok(serde_json::from_slice(&b)?),
            Self::Stream(_) => Err(ApiError::UnexpectedResponse(
                "cannot decode a streaming body as JSON".into(),
            )),
        }
    }
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Forward-only stream over an HTTP response body.
///
/// Dropping it drops the response and releases the connection.
pub struct HttpByteStream {
    inner: ChunkStream,
    content_length: Option<u64>,
    received: u64,
    done: bool,
}

impl fmt::Debug for HttpByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpByteStream")
            .field("content_length", &self.content_length)
            .field("received", &self.received)
            .field("done", &self.done)
            .finish()
    }
}

impl HttpByteStream {
    pub fn new(resp: reqwest::Response) -> Self {
        let content_length = resp.content_length();
        let inner = resp.bytes_stream().map(|r| r.map(|b| b.to_vec()));
        Self {
            inner: Box::pin(inner),
            content_length,
            received: 0,
            done: false,
        }
    }

    /// Next non-empty chunk, or `None` at end of body.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        while !self.done {
            match self.inner.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.received += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e.into());
                }
                None => self.done = true,
            }
        }
        Ok(None)
    }

    /// Body size announced by the server, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_json_from_buffered_variants() {
        let v: Vec<String> = ApiResponse::Json(serde_json::json!(["a", "b"]))
            .into_json()
            .unwrap();
        assert_eq!(v, ["a", "b"]);

        let v: Vec<String> = ApiResponse::Text(r#"["c"]"#.into()).into_json().unwrap();
        assert_eq!(v, ["c"]);

        let v: u32 = ApiResponse::Bytes(b"42".to_vec()).into_json().unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn encoding_matches_variant() {
        assert_eq!(
            ApiResponse::Text(String::new()).encoding(),
            ResponseEncoding::Text
        );
        assert_eq!(
            ApiResponse::Bytes(Vec::new()).encoding(),
            ResponseEncoding::Bytes
        );
    }

    #[test]
    fn debug_does_not_dump_bodies() {
        let dbg = format!("{:?}", ApiResponse::Text("payload-contents".into()));
        assert!(!dbg.contains("payload-contents"));
    }
}
