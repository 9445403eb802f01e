//! Framed, ordered byte channel over one socket connection.

use std::io::ErrorKind;

use norman_transfer::IoConfig;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SocketError;
use crate::wire::{
    ChunkFrame, FrameHeader, read_auth_response, read_frame, write_auth_response, write_frame,
};
use crate::{CONNECT_TIMEOUT, MAX_HANDSHAKE_LEN};

/// One socket connection carrying a single transfer session.
///
/// Frames must be sent with consecutive sequence numbers starting at 0.
/// Received frames are numbered the same way. The write side is buffered
/// with a fixed capacity; nothing else is buffered beyond one frame.
pub struct SocketChannel<S = TcpStream> {
    stream: BufWriter<S>,
    endpoint: String,
    max_frame: usize,
    next_send: u64,
    next_recv: u64,
}

impl SocketChannel<TcpStream> {
    /// Opens a TCP connection to `endpoint` (`host:port`).
    pub async fn connect(
        endpoint: &str,
        io: &IoConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, SocketError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SocketError::Cancelled);
            }
            result = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint)) => {
                match result {
                    Ok(Ok(s)) => s,
                    Ok(Err(e)) => {
                        return Err(SocketError::Connection(format!("{endpoint}: {e}")));
                    }
                    Err(_) => return Err(SocketError::Timeout("connect")),
                }
            }
        };
        stream.set_nodelay(true)?;

        info!(%endpoint, "socket channel connected");
        Ok(Self::new(stream, endpoint, io))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> SocketChannel<S> {
    /// Wraps an already-connected transport.
    pub fn new(stream: S, endpoint: impl Into<String>, io: &IoConfig) -> Self {
        Self {
            stream: BufWriter::with_capacity(io.write_buffer, stream),
            endpoint: endpoint.into(),
            max_frame: io.chunk_size,
            next_send: 0,
            next_recv: 0,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Data frames sent so far, including the end frame.
    pub fn frames_sent(&self) -> u64 {
        self.next_send
    }

    /// Data frames received so far, including the end frame.
    pub fn frames_received(&self) -> u64 {
        self.next_recv
    }

    /// Client side of the handshake: sends the encrypted header and waits
    /// for the peer's verdict.
    pub async fn handshake(&mut self, encrypted_header: &[u8]) -> Result<bool, SocketError> {
        if encrypted_header.len() > MAX_HANDSHAKE_LEN {
            return Err(SocketError::Frame(format!(
                "authentication header of {} bytes exceeds {MAX_HANDSHAKE_LEN}",
                encrypted_header.len()
            )));
        }
        write_frame(&mut self.stream, encrypted_header, false).await?;
        self.stream.flush().await?;
        read_auth_response(&mut self.stream).await
    }

    /// Service side of the handshake: reads the encrypted header into `buf`.
    pub async fn read_handshake(&mut self, buf: &mut Vec<u8>) -> Result<(), SocketError> {
        let (_, end) = read_frame(&mut self.stream, buf, MAX_HANDSHAKE_LEN).await?;
        if end {
            return Err(SocketError::Frame("handshake frame flagged end of stream".into()));
        }
        Ok(())
    }

    /// Service side of the handshake: replies with the verdict.
    pub async fn answer_handshake(&mut self, accepted: bool) -> Result<(), SocketError> {
        write_auth_response(&mut self.stream, accepted).await
    }

    /// Queues one frame. Frames reach the socket when the write buffer
    /// fills, on [`flush`](Self::flush) or on [`close`](Self::close).
    pub async fn send_frame(&mut self, frame: &ChunkFrame<'_>) -> Result<(), SocketError> {
        if frame.sequence != self.next_send {
            return Err(SocketError::Frame(format!(
                "out-of-order frame {} (expected {})",
                frame.sequence, self.next_send
            )));
        }
        if frame.payload.len() > self.max_frame {
            return Err(SocketError::Frame(format!(
                "frame of {} bytes exceeds limit of {}",
                frame.payload.len(),
                self.max_frame
            )));
        }
        write_frame(&mut self.stream, frame.payload, frame.end_of_stream).await?;
        self.next_send += 1;
        Ok(())
    }

    /// Receives the next frame into `buf`.
    ///
    /// Fails with [`SocketError::ChannelClosed`] if the peer closed the
    /// connection at a frame boundary.
    pub async fn recv_frame(&mut self, buf: &mut Vec<u8>) -> Result<FrameHeader, SocketError> {
        let (len, end_of_stream) = read_frame(&mut self.stream, buf, self.max_frame).await?;
        let sequence = self.next_recv;
        self.next_recv += 1;
        Ok(FrameHeader {
            sequence,
            len,
            end_of_stream,
        })
    }

    pub async fn flush(&mut self) -> Result<(), SocketError> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Flushes pending frames and shuts down the write half.
    ///
    /// A peer that already hung up is not an error.
    pub async fn close(mut self) -> Result<(), SocketError> {
        let result = async {
            self.stream.flush().await?;
            self.stream.shutdown().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, frames = self.next_send, "socket channel closed");
                Ok(())
            }
            Err(e) if is_disconnect(&e) => {
                debug!(endpoint = %self.endpoint, error = %e, "peer already disconnected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::NotConnected
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(chunk_size: usize) -> IoConfig {
        IoConfig {
            chunk_size,
            write_buffer: 1024,
        }
    }

    fn pair(chunk_size: usize) -> (SocketChannel<tokio::io::DuplexStream>, SocketChannel<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            SocketChannel::new(a, "client", &io(chunk_size)),
            SocketChannel::new(b, "peer", &io(chunk_size)),
        )
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (mut tx, mut rx) = pair(8);
        tx.send_frame(&ChunkFrame::data(0, b"first")).await.unwrap();
        tx.send_frame(&ChunkFrame::data(1, b"second")).await.unwrap();
        tx.send_frame(&ChunkFrame::end(2)).await.unwrap();
        tx.close().await.unwrap();

        let mut buf = Vec::new();
        let h = rx.recv_frame(&mut buf).await.unwrap();
        assert_eq!((h.sequence, &buf[..h.len]), (0, &b"first"[..]));
        let h = rx.recv_frame(&mut buf).await.unwrap();
        assert_eq!((h.sequence, &buf[..h.len]), (1, &b"second"[..]));
        let h = rx.recv_frame(&mut buf).await.unwrap();
        assert!(h.end_of_stream);
        assert_eq!(h.len, 0);

        assert!(matches!(
            rx.recv_frame(&mut buf).await,
            Err(SocketError::ChannelClosed)
        ));
        assert_eq!(rx.frames_received(), 3);
    }

    #[tokio::test]
    async fn out_of_order_send_rejected() {
        let (mut tx, _rx) = pair(8);
        let err = tx.send_frame(&ChunkFrame::data(1, b"x")).await.unwrap_err();
        assert!(matches!(err, SocketError::Frame(_)));
        assert_eq!(tx.frames_sent(), 0);
    }

    #[tokio::test]
    async fn oversized_send_rejected() {
        let (mut tx, _rx) = pair(4);
        assert!(matches!(
            tx.send_frame(&ChunkFrame::data(0, b"too long")).await,
            Err(SocketError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn handshake_accept_and_reject() {
        let (mut client, mut peer) = pair(8);

        let peer_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            peer.read_handshake(&mut buf).await.unwrap();
            peer.answer_handshake(buf == b"secret-header").await.unwrap();
            buf
        });

        assert!(client.handshake(b"secret-header").await.unwrap());
        assert_eq!(peer_task.await.unwrap(), b"secret-header");

        let (mut client, mut peer) = pair(8);
        let peer_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            peer.read_handshake(&mut buf).await.unwrap();
            peer.answer_handshake(false).await.unwrap();
        });
        assert!(!client.handshake(b"wrong").await.unwrap());
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_header_may_exceed_chunk_size() {
        let (mut client, mut peer) = pair(4);
        let header = vec![9u8; 64];
        let expected = header.clone();
        let peer_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            peer.read_handshake(&mut buf).await.unwrap();
            peer.answer_handshake(buf == expected).await.unwrap();
        });
        assert!(client.handshake(&header).await.unwrap());
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn close_after_peer_dropped_is_ok() {
        let (tx, rx) = pair(8);
        drop(rx);
        tx.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        // Bind then drop to get a port with no listener.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = SocketChannel::connect(&addr.to_string(), &io(8), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_connection(), "{err}");
    }

    #[tokio::test]
    async fn connect_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = SocketChannel::connect("127.0.0.1:9", &io(8), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SocketError::Cancelled));
    }
}
