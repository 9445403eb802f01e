//! Lazy byte streams returned by downloads and retrieves.

use futures_util::Stream;
use futures_util::stream;
use norman_api::HttpByteStream;
use norman_socket::DownloadStream;
use norman_transfer::Digest;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::state::TransferTracker;

/// A forward-only, non-restartable sequence of payload chunks.
///
/// Chunks are never empty. Dropping the stream at any point releases the
/// socket or HTTP response behind it.
#[derive(Debug)]
pub enum ByteStream {
    /// Decrypted chunks from an allocated socket.
    Socket(SocketDownload),
    /// Body of a direct retrieve request.
    Http(HttpByteStream),
}

impl ByteStream {
    /// Next chunk, or `None` once the payload is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ServiceError> {
        match self {
            Self::Socket(s) => s.next_chunk().await,
            Self::Http(s) => Ok(s.next_chunk().await?),
        }
    }

    /// Payload bytes yielded so far.
    pub fn received(&self) -> u64 {
        match self {
            Self::Socket(s) => s.stream.received(),
            Self::Http(s) => s.received(),
        }
    }

    /// Adapts this into a [`Stream`]. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>, ServiceError>> {
        stream::unfold(Some(self), |state| async move {
            let mut inner = state?;
            match inner.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(inner))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// A socket download bound to its transfer lifecycle.
///
/// Reaching the end of the payload completes the transfer; an error fails
/// it. Dropping it early leaves the transfer unfinished and closes the
/// socket.
pub struct SocketDownload {
    stream: DownloadStream,
    tracker: Option<TransferTracker>,
    transfer_id: Uuid,
}

impl std::fmt::Debug for SocketDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketDownload")
            .field("transfer_id", &self.transfer_id)
            .field("received", &self.stream.received())
            .field("finished", &self.stream.is_finished())
            .finish()
    }
}

impl SocketDownload {
    pub(crate) fn new(stream: DownloadStream, tracker: TransferTracker) -> Self {
        Self {
            stream,
            transfer_id: tracker.id(),
            tracker: Some(tracker),
        }
    }

    pub fn transfer_id(&self) -> Uuid {
        self.transfer_id
    }

    /// Final digest, available once the payload is exhausted.
    pub fn digest(&self) -> Option<Digest> {
        self.stream.digest()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ServiceError> {
        let next = self
            .stream
            .next_chunk()
            .await
            .map(|chunk| chunk.map(<[u8]>::to_vec));

        match next {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                if let (Some(mut tracker), Some(digest)) = (self.tracker.take(), self.digest()) {
                    tracker.complete(digest)?;
                }
                Ok(None)
            }
            Err(e) => {
                let err = ServiceError::from(e);
                if let Some(mut tracker) = self.tracker.take() {
                    tracker.fail(&err);
                }
                Err(err)
            }
        }
    }
}

impl Drop for SocketDownload {
    fn drop(&mut self) {
        if self.tracker.is_some() {
            debug!(
                transfer_id = %self.transfer_id,
                bytes = self.stream.received(),
                "download abandoned before end of payload"
            );
        }
    }
}
