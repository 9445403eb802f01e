//! Socket client: streams one payload through an authenticated channel.
//!
//! Uploads read plaintext from any `AsyncRead`, digest it, encrypt it and
//! send it frame by frame. Downloads do the reverse, either eagerly into an
//! `AsyncWrite` sink or lazily through a [`DownloadStream`].

use std::fmt;

use norman_protocol::{Direction, PairingSecrets, SocketPairingResponse, TransferKind};
use norman_transfer::{
    ChunkSource, CipherStream, Digest, DigestEngine, IoConfig, StreamDirection, TransferProgress,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::HANDSHAKE_TIMEOUT;
use crate::channel::SocketChannel;
use crate::error::SocketError;
use crate::wire::ChunkFrame;

// ---------------------------------------------------------------------------
// TransferSession
// ---------------------------------------------------------------------------

/// Everything needed to run one transfer over an allocated socket.
///
/// Built from the control plane's pairing response. Holds the decoded
/// session secrets, which are wiped on drop and never printed.
pub struct TransferSession {
    /// Pairing id assigned by the control plane.
    pub session_id: String,
    pub direction: Direction,
    pub kind: TransferKind,
    /// `host:port` of the allocated socket.
    pub endpoint: String,
    pub chunk_size: usize,
    /// Payload size: announced by the service for downloads, declared at
    /// allocation for uploads.
    pub total_bytes_expected: Option<u64>,
    /// Plaintext digest announced by the service (downloads only).
    pub expected_digest: Option<Digest>,
    secrets: PairingSecrets,
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("session_id", &self.session_id)
            .field("direction", &self.direction)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("chunk_size", &self.chunk_size)
            .field("total_bytes_expected", &self.total_bytes_expected)
            .field("expected_digest", &self.expected_digest)
            .finish_non_exhaustive()
    }
}

impl TransferSession {
    /// Decodes a pairing response into a session.
    ///
    /// Fails before any socket is opened if a secret is malformed.
    pub fn from_pairing(
        pairing: &SocketPairingResponse,
        kind: TransferKind,
        direction: Direction,
        chunk_size: usize,
    ) -> Result<Self, SocketError> {
        let secrets = pairing.decode_secrets()?;
        let (total_bytes_expected, expected_digest) = match direction {
            Direction::Upload => (None, None),
            Direction::Download => (
                pairing.file_size_in_bytes,
                pairing
                    .checksum
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .map(str::parse::<Digest>)
                    .transpose()?,
            ),
        };

        Ok(Self {
            session_id: pairing.pairing_id.clone(),
            direction,
            kind,
            endpoint: pairing.endpoint(),
            chunk_size,
            total_bytes_expected,
            expected_digest,
            secrets,
        })
    }

    /// Pins the upload to exactly `bytes` of plaintext.
    pub fn with_declared_size(mut self, bytes: u64) -> Self {
        self.total_bytes_expected = Some(bytes);
        self
    }

    fn cipher(&self, direction: StreamDirection) -> CipherStream {
        CipherStream::for_direction(&self.secrets.key, &self.secrets.nonce, self.chunk_size, direction)
    }

    fn expect_direction(&self, direction: Direction) -> Result<(), SocketError> {
        if self.direction != direction {
            return Err(SocketError::WrongDirection(self.direction));
        }
        Ok(())
    }
}

/// Opens the TCP connection for `session`.
pub async fn connect(
    session: &TransferSession,
    io: &IoConfig,
    cancel: &CancellationToken,
) -> Result<SocketChannel<TcpStream>, SocketError> {
    SocketChannel::connect(&session.endpoint, io, cancel).await
}

/// Sends the encrypted authentication header. The header takes the first
/// bytes of the outbound keystream.
async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    channel: &mut SocketChannel<S>,
    session: &TransferSession,
    outbound: &mut CipherStream,
    cancel: &CancellationToken,
) -> Result<(), SocketError> {
    let mut header = Zeroizing::new(session.secrets.authentication_header.to_vec());
    outbound.encrypt_preamble(&mut header)?;

    let accepted = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(SocketError::Cancelled);
        }
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, channel.handshake(&header)) => {
            match result {
                Ok(r) => r?,
                Err(_) => return Err(SocketError::Timeout("handshake")),
            }
        }
    };

    if !accepted {
        warn!(pairing_id = %session.session_id, endpoint = %session.endpoint, "handshake rejected");
        return Err(SocketError::Connection("handshake rejected by peer".into()));
    }

    debug!(pairing_id = %session.session_id, "socket session authenticated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Streams `source` to the peer and returns the plaintext digest.
///
/// Plaintext is read in `chunk_size` units through one reusable buffer,
/// digested, encrypted in place and sent. After the source is exhausted an
/// empty end frame is sent and the channel is closed. Cancellation drops
/// the channel immediately.
pub async fn write_and_digest<S, R>(
    mut channel: SocketChannel<S>,
    session: &TransferSession,
    source: R,
    progress: Option<mpsc::Sender<TransferProgress>>,
    cancel: &CancellationToken,
) -> Result<Digest, SocketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    session.expect_direction(Direction::Upload)?;

    let mut cipher = session.cipher(StreamDirection::Outbound);
    authenticate(&mut channel, session, &mut cipher, cancel).await?;

    let mut source = ChunkSource::new(source, session.chunk_size);
    let mut digest = DigestEngine::new();
    let mut sequence = 0u64;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SocketError::Cancelled);
            }
            result = source.next_chunk() => result?,
        };
        let Some(chunk) = chunk else {
            break;
        };

        if let Some(expected) = session.total_bytes_expected {
            let read = digest.bytes() + chunk.len() as u64;
            if read > expected {
                warn!(pairing_id = %session.session_id, read, expected, "source exceeds declared size");
                return Err(SocketError::IncompleteTransfer {
                    received: read,
                    expected: Some(expected),
                });
            }
        }

        digest.update(chunk)?;
        cipher.encrypt_chunk(chunk)?;

        let frame = ChunkFrame::data(sequence, chunk);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SocketError::Cancelled);
            }
            result = channel.send_frame(&frame) => result?,
        }
        sequence += 1;

        if let Some(tx) = &progress {
            // Report progress (non-blocking).
            let _ = tx.try_send(TransferProgress {
                bytes: digest.bytes(),
                frames: sequence,
                total: session.total_bytes_expected,
            });
        }
    }

    // Short source: drop the channel without an end frame.
    if let Some(expected) = session.total_bytes_expected {
        if digest.bytes() != expected {
            warn!(pairing_id = %session.session_id, read = digest.bytes(), expected, "source ended before declared size");
            return Err(SocketError::IncompleteTransfer {
                received: digest.bytes(),
                expected: Some(expected),
            });
        }
    }

    channel.send_frame(&ChunkFrame::end(sequence)).await?;
    cipher.finish();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(SocketError::Cancelled);
        }
        result = channel.close() => result?,
    }

    let digest = digest.finalize()?;
    info!(
        pairing_id = %session.session_id,
        bytes = source.offset(),
        frames = sequence,
        %digest,
        "upload stream complete"
    );
    Ok(digest)
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Authenticates and returns a lazy download stream.
pub async fn open_download<S>(
    mut channel: SocketChannel<S>,
    session: &TransferSession,
    cancel: CancellationToken,
) -> Result<DownloadStream<S>, SocketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.expect_direction(Direction::Download)?;

    let mut outbound = session.cipher(StreamDirection::Outbound);
    authenticate(&mut channel, session, &mut outbound, &cancel).await?;
    outbound.finish();

    Ok(DownloadStream {
        channel: Some(channel),
        cipher: session.cipher(StreamDirection::Inbound),
        digest: DigestEngine::new(),
        buf: Vec::with_capacity(session.chunk_size),
        session_id: session.session_id.clone(),
        expected_bytes: session.total_bytes_expected,
        expected_digest: session.expected_digest,
        received: 0,
        frames: 0,
        pending_end: false,
        result: None,
        progress: None,
        cancel,
    })
}

/// Receives the whole payload into `sink` and returns the plaintext digest.
pub async fn read_and_digest<S, W>(
    channel: SocketChannel<S>,
    session: &TransferSession,
    mut sink: W,
    progress: Option<mpsc::Sender<TransferProgress>>,
    cancel: &CancellationToken,
) -> Result<Digest, SocketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stream = open_download(channel, session, cancel.clone()).await?;
    if let Some(tx) = progress {
        stream = stream.with_progress(tx);
    }

    while let Some(chunk) = stream.next_chunk().await? {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SocketError::Cancelled);
            }
            result = sink.write_all(chunk) => result?,
        }
    }
    sink.flush().await?;

    stream.digest().ok_or(SocketError::IncompleteTransfer {
        received: stream.received(),
        expected: session.total_bytes_expected,
    })
}

/// Forward-only stream of decrypted download chunks.
///
/// Each call to [`next_chunk`](Self::next_chunk) receives at most one
/// frame. Empty frames are skipped, so a yielded chunk is never empty.
/// Once the end frame arrives the byte count and digest are checked and
/// the channel is closed. Dropping the stream early drops the channel.
pub struct DownloadStream<S = TcpStream> {
    channel: Option<SocketChannel<S>>,
    cipher: CipherStream,
    digest: DigestEngine,
    buf: Vec<u8>,
    session_id: String,
    expected_bytes: Option<u64>,
    expected_digest: Option<Digest>,
    received: u64,
    frames: u64,
    pending_end: bool,
    result: Option<Digest>,
    progress: Option<mpsc::Sender<TransferProgress>>,
    cancel: CancellationToken,
}

impl<S: AsyncRead + AsyncWrite + Unpin> DownloadStream<S> {
    /// Reports progress on `tx` after every chunk.
    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Returns the next plaintext chunk, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<&[u8]>, SocketError> {
        let len = self.fill().await?;
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(&self.buf[..len]))
    }

    /// Plaintext bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Final digest, available once the stream is exhausted.
    pub fn digest(&self) -> Option<Digest> {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Receives frames until one carries data. Returns 0 once finished.
    async fn fill(&mut self) -> Result<usize, SocketError> {
        loop {
            if self.result.is_some() {
                return Ok(0);
            }
            if self.pending_end {
                self.complete().await?;
                return Ok(0);
            }
            let Some(channel) = self.channel.as_mut() else {
                return Err(SocketError::ChannelClosed);
            };

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = channel.recv_frame(&mut self.buf) => Some(result),
            };

            let header = match received {
                None => {
                    self.abort();
                    return Err(SocketError::Cancelled);
                }
                Some(Err(SocketError::ChannelClosed)) => {
                    self.abort();
                    return Err(SocketError::IncompleteTransfer {
                        received: self.received,
                        expected: self.expected_bytes,
                    });
                }
                Some(Err(e)) => {
                    self.abort();
                    return Err(e);
                }
                Some(Ok(header)) => header,
            };

            if header.len > 0 {
                let chunk = &mut self.buf[..header.len];
                let absorbed = match self.cipher.decrypt_chunk(chunk) {
                    Ok(()) => self.digest.update(chunk).map_err(SocketError::from),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = absorbed {
                    self.abort();
                    return Err(e);
                }
                self.received += header.len as u64;
                self.frames += 1;

                if let Some(expected) = self.expected_bytes {
                    if self.received > expected {
                        self.abort();
                        return Err(SocketError::IncompleteTransfer {
                            received: self.received,
                            expected: Some(expected),
                        });
                    }
                }
                if let Some(tx) = &self.progress {
                    let _ = tx.try_send(TransferProgress {
                        bytes: self.received,
                        frames: self.frames,
                        total: self.expected_bytes,
                    });
                }

                self.pending_end = header.end_of_stream;
                return Ok(header.len);
            }

            if header.end_of_stream {
                self.complete().await?;
                return Ok(0);
            }
        }
    }

    async fn complete(&mut self) -> Result<(), SocketError> {
        self.pending_end = false;
        self.cipher.finish();

        if let Some(expected) = self.expected_bytes {
            if self.received != expected {
                self.abort();
                return Err(SocketError::IncompleteTransfer {
                    received: self.received,
                    expected: Some(expected),
                });
            }
        }

        let digest = match self.digest.finalize() {
            Ok(digest) => digest,
            Err(e) => {
                self.abort();
                return Err(e.into());
            }
        };
        if let Some(expected) = self.expected_digest {
            if expected != digest {
                self.abort();
                error!(pairing_id = %self.session_id, %expected, actual = %digest, "download digest mismatch");
                return Err(SocketError::DigestMismatch {
                    expected,
                    actual: digest,
                });
            }
        }

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(pairing_id = %self.session_id, error = %e, "close after download failed");
            }
        }
        self.result = Some(digest);

        info!(
            pairing_id = %self.session_id,
            bytes = self.received,
            frames = self.frames,
            %digest,
            "download stream complete"
        );
        Ok(())
    }

    fn abort(&mut self) {
        self.channel = None;
        self.pending_end = false;
    }
}

impl<S> Drop for DownloadStream<S> {
    fn drop(&mut self) {
        if self.result.is_none() && self.channel.is_some() {
            debug!(
                pairing_id = %self.session_id,
                bytes = self.received,
                "download stream dropped before end of stream"
            );
        }
    }
}
