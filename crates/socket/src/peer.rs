//! Service side of the socket protocol, bound to loopback.
//!
//! Accepts one connection, validates the authentication header and then
//! either receives an upload or serves a download. Used by the test suites
//! and for exercising clients locally without a storage service.

use std::fmt;
use std::net::SocketAddr;

use base64::{Engine, engine::general_purpose::STANDARD};
use norman_protocol::{KEY_LEN, NONCE_LEN, SocketPairingResponse};
use norman_transfer::{
    ChunkSource, CipherStream, Digest, DigestEngine, IoConfig, StreamDirection,
};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::channel::SocketChannel;
use crate::error::SocketError;
use crate::wire::ChunkFrame;
use crate::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT};

/// Length of generated authentication headers.
const HEADER_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Per-session secrets as the service holds them.
#[derive(Clone)]
pub struct PeerSecrets {
    key: Zeroizing<[u8; KEY_LEN]>,
    nonce: [u8; NONCE_LEN],
    header: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for PeerSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSecrets").finish_non_exhaustive()
    }
}

impl PeerSecrets {
    /// Generates fresh secrets from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        let mut header = Zeroizing::new(vec![0u8; HEADER_LEN]);
        rng.fill(&mut key[..]);
        rng.fill(&mut nonce[..]);
        rng.fill(&mut header[..]);
        Self { key, nonce, header }
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Renders the secrets the way the control plane hands them out.
    pub fn pairing_response(&self, pairing_id: &str, addr: SocketAddr) -> SocketPairingResponse {
        SocketPairingResponse {
            pairing_id: pairing_id.to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            encryption_key: STANDARD.encode(&self.key[..]),
            nonce: STANDARD.encode(self.nonce),
            authentication_header: STANDARD.encode(&self.header[..]),
            file_size_in_bytes: None,
            checksum: None,
        }
    }

    fn cipher(&self, chunk_size: usize, direction: StreamDirection) -> CipherStream {
        CipherStream::for_direction(&self.key, &self.nonce, chunk_size, direction)
    }

    /// Constant-time comparison against the expected header.
    fn validate_header(&self, received: &[u8]) -> bool {
        if received.len() != self.header.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in received.iter().zip(self.header.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

/// What the peer saw of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerReport {
    pub bytes: u64,
    pub frames: u64,
    pub digest: Digest,
}

// ---------------------------------------------------------------------------
// Session handlers
// ---------------------------------------------------------------------------

/// Reads and checks the client's handshake. Returns the receive cipher,
/// already advanced past the header.
async fn verify_client<S: AsyncRead + AsyncWrite + Unpin>(
    channel: &mut SocketChannel<S>,
    secrets: &PeerSecrets,
    chunk_size: usize,
) -> Result<CipherStream, SocketError> {
    let mut header = Zeroizing::new(Vec::new());
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, channel.read_handshake(&mut header)).await {
        Ok(r) => r?,
        Err(_) => return Err(SocketError::Timeout("handshake")),
    }

    let mut rx = secrets.cipher(chunk_size, StreamDirection::Outbound);
    rx.decrypt_preamble(&mut header)?;

    if !secrets.validate_header(&header) {
        warn!(endpoint = %channel.endpoint(), "peer: invalid authentication header");
        channel.answer_handshake(false).await?;
        return Err(SocketError::Connection("invalid authentication header".into()));
    }
    channel.answer_handshake(true).await?;
    debug!(endpoint = %channel.endpoint(), "peer: client authenticated");
    Ok(rx)
}

/// Receives one upload into `sink`.
pub async fn receive_upload<S, W>(
    mut channel: SocketChannel<S>,
    secrets: &PeerSecrets,
    chunk_size: usize,
    mut sink: W,
) -> Result<PeerReport, SocketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut rx = verify_client(&mut channel, secrets, chunk_size).await?;
    let mut digest = DigestEngine::new();
    let mut buf = Vec::with_capacity(chunk_size);
    let mut frames = 0u64;

    loop {
        let header = match channel.recv_frame(&mut buf).await {
            Ok(h) => h,
            Err(SocketError::ChannelClosed) => {
                return Err(SocketError::IncompleteTransfer {
                    received: digest.bytes(),
                    expected: None,
                });
            }
            Err(e) => return Err(e),
        };

        if header.len > 0 {
            let chunk = &mut buf[..header.len];
            rx.decrypt_chunk(chunk)?;
            digest.update(chunk)?;
            sink.write_all(chunk).await?;
            frames += 1;
        }
        if header.end_of_stream {
            break;
        }
    }

    rx.finish();
    sink.flush().await?;
    let report = PeerReport {
        bytes: digest.bytes(),
        frames,
        digest: digest.finalize()?,
    };
    info!(bytes = report.bytes, frames, digest = %report.digest, "peer: upload received");
    Ok(report)
}

/// Serves `source` as one download.
pub async fn send_download<S, R>(
    mut channel: SocketChannel<S>,
    secrets: &PeerSecrets,
    chunk_size: usize,
    source: R,
) -> Result<PeerReport, SocketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut rx = verify_client(&mut channel, secrets, chunk_size).await?;
    rx.finish();

    let mut tx = secrets.cipher(chunk_size, StreamDirection::Inbound);
    let mut source = ChunkSource::new(source, chunk_size);
    let mut digest = DigestEngine::new();
    let mut sequence = 0u64;

    while let Some(chunk) = source.next_chunk().await? {
        digest.update(chunk)?;
        tx.encrypt_chunk(chunk)?;
        channel.send_frame(&ChunkFrame::data(sequence, chunk)).await?;
        sequence += 1;
    }
    channel.send_frame(&ChunkFrame::end(sequence)).await?;
    tx.finish();
    channel.close().await?;

    let report = PeerReport {
        bytes: digest.bytes(),
        frames: sequence,
        digest: digest.finalize()?,
    };
    info!(bytes = report.bytes, frames = sequence, digest = %report.digest, "peer: download served");
    Ok(report)
}

// ---------------------------------------------------------------------------
// LoopbackPeer
// ---------------------------------------------------------------------------

/// A one-shot socket service on `127.0.0.1`.
pub struct LoopbackPeer {
    listener: TcpListener,
    secrets: PeerSecrets,
    io: IoConfig,
    cancel: CancellationToken,
}

impl LoopbackPeer {
    /// Binds an ephemeral port and generates session secrets.
    pub async fn bind(io: IoConfig, cancel: CancellationToken) -> Result<Self, SocketError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        info!(port = listener.local_addr()?.port(), "loopback peer bound");
        Ok(Self {
            listener,
            secrets: PeerSecrets::generate(),
            io,
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn secrets(&self) -> &PeerSecrets {
        &self.secrets
    }

    /// The pairing response a control plane would return for this peer.
    pub fn pairing_response(&self, pairing_id: &str) -> Result<SocketPairingResponse, SocketError> {
        Ok(self.secrets.pairing_response(pairing_id, self.local_addr()?))
    }

    /// Accepts one client and receives its upload into `sink`.
    pub async fn accept_upload<W: AsyncWrite + Unpin>(
        self,
        sink: W,
    ) -> Result<PeerReport, SocketError> {
        let channel = self.accept().await?;
        receive_upload(channel, &self.secrets, self.io.chunk_size, sink).await
    }

    /// Accepts one client and serves `source` to it.
    pub async fn accept_download<R: AsyncRead + Unpin>(
        self,
        source: R,
    ) -> Result<PeerReport, SocketError> {
        let channel = self.accept().await?;
        send_download(channel, &self.secrets, self.io.chunk_size, source).await
    }

    async fn accept(&self) -> Result<SocketChannel<TcpStream>, SocketError> {
        let (stream, addr) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(SocketError::Cancelled);
            }
            result = tokio::time::timeout(CONNECT_TIMEOUT, self.listener.accept()) => {
                match result {
                    Ok(r) => r?,
                    Err(_) => return Err(SocketError::Timeout("accept")),
                }
            }
        };
        debug!(%addr, "loopback peer accepted connection");
        Ok(SocketChannel::new(stream, addr.to_string(), &self.io))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norman_protocol::{Direction, TransferKind};

    use crate::client::{self, TransferSession};

    fn io() -> IoConfig {
        IoConfig {
            chunk_size: 8,
            write_buffer: 4096,
        }
    }

    #[test]
    fn generated_secrets_are_unique() {
        let a = PeerSecrets::generate();
        let b = PeerSecrets::generate();
        assert_ne!(*a.key, *b.key);
        assert_ne!(*a.header, *b.header);
        assert_eq!(a.header_len(), HEADER_LEN);
    }

    #[test]
    fn header_validation() {
        let secrets = PeerSecrets::generate();
        let header = secrets.header.to_vec();
        assert!(secrets.validate_header(&header));

        let mut tampered = header.clone();
        tampered[0] ^= 1;
        assert!(!secrets.validate_header(&tampered));
        assert!(!secrets.validate_header(&header[..4]));
    }

    #[test]
    fn pairing_response_decodes_back() {
        let secrets = PeerSecrets::generate();
        let resp = secrets.pairing_response("p", "127.0.0.1:4000".parse().unwrap());
        let decoded = resp.decode_secrets().unwrap();
        assert_eq!(*decoded.key, *secrets.key);
        assert_eq!(decoded.nonce, secrets.nonce);
        assert_eq!(resp.endpoint(), "127.0.0.1:4000");
        assert!(!format!("{secrets:?}").contains(&resp.encryption_key));
    }

    #[tokio::test]
    async fn tcp_upload_end_to_end() {
        let cancel = CancellationToken::new();
        let peer = LoopbackPeer::bind(io(), cancel.clone()).await.unwrap();
        let pairing = peer.pairing_response("tcp-up").unwrap();
        let session =
            TransferSession::from_pairing(&pairing, TransferKind::Asset, Direction::Upload, 8)
                .unwrap();

        let server = tokio::spawn(async move {
            let mut out = Vec::new();
            let report = peer.accept_upload(&mut out).await?;
            Ok::<_, SocketError>((report, out))
        });

        let payload: Vec<u8> = (0..100u8).collect();
        let channel = client::connect(&session, &io(), &cancel).await.unwrap();
        let digest = client::write_and_digest(channel, &session, &payload[..], None, &cancel)
            .await
            .unwrap();

        let (report, out) = server.await.unwrap().unwrap();
        assert_eq!(out, payload);
        assert_eq!(report.digest, digest);
        assert_eq!(report.frames, 13);
    }

    #[tokio::test]
    async fn tcp_download_end_to_end() {
        let cancel = CancellationToken::new();
        let peer = LoopbackPeer::bind(io(), cancel.clone()).await.unwrap();
        let mut pairing = peer.pairing_response("tcp-down").unwrap();
        let payload: Vec<u8> = (0..50u8).rev().collect();
        pairing.file_size_in_bytes = Some(payload.len() as u64);
        pairing.checksum = Some(norman_transfer::digest_bytes(&payload).to_hex());
        let session = TransferSession::from_pairing(
            &pairing,
            TransferKind::InvocationOutput,
            Direction::Download,
            8,
        )
        .unwrap();

        let served = payload.clone();
        let server = tokio::spawn(async move { peer.accept_download(&served[..]).await });

        let channel = client::connect(&session, &io(), &cancel).await.unwrap();
        let mut out = Vec::new();
        let digest = client::read_and_digest(channel, &session, &mut out, None, &cancel)
            .await
            .unwrap();

        assert_eq!(out, payload);
        assert_eq!(server.await.unwrap().unwrap().digest, digest);
    }

    #[tokio::test]
    async fn accept_cancelled() {
        let cancel = CancellationToken::new();
        let peer = LoopbackPeer::bind(io(), cancel.clone()).await.unwrap();
        cancel.cancel();
        assert!(matches!(
            peer.accept_upload(tokio::io::sink()).await,
            Err(SocketError::Cancelled)
        ));
    }
}
