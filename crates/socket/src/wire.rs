//! Binary wire format for socket transfers.
//!
//! # Wire format
//!
//! ```text
//! HANDSHAKE (client -> service):  one frame, flag 0x00, payload = encrypted
//!                                 authentication header (first keystream bytes)
//! AUTH RESPONSE (service -> client): [1 byte: 0x01=OK, 0x00=rejected]
//!
//! FRAME:
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: ciphertext]
//!   [1 byte: 0x00=data, 0x01=end of stream]
//!
//! END OF STREAM: an empty frame with flag 0x01
//! ```
//!
//! EOF exactly at a frame boundary means the peer closed the channel. EOF
//! anywhere inside a frame is a truncated frame.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SocketError;

/// Flag byte: data frame.
pub const FLAG_DATA: u8 = 0x00;

/// Flag byte: end of stream.
pub const FLAG_END: u8 = 0x01;

/// Authentication response: accepted.
pub const AUTH_OK: u8 = 0x01;

/// Authentication response: rejected.
pub const AUTH_REJECTED: u8 = 0x00;

/// Bytes of framing around each payload (length prefix + flag).
pub const FRAME_OVERHEAD: usize = 5;

/// An outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFrame<'a> {
    /// Position in the session, starting at 0.
    pub sequence: u64,
    /// Ciphertext, at most one chunk.
    pub payload: &'a [u8],
    pub end_of_stream: bool,
}

impl<'a> ChunkFrame<'a> {
    pub fn data(sequence: u64, payload: &'a [u8]) -> Self {
        Self {
            sequence,
            payload,
            end_of_stream: false,
        }
    }

    /// The empty terminating frame.
    pub fn end(sequence: u64) -> Self {
        Self {
            sequence,
            payload: &[],
            end_of_stream: true,
        }
    }
}

/// Metadata of a received frame. The payload lives in the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u64,
    pub len: usize,
    pub end_of_stream: bool,
}

/// Writes one frame. Does not flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    end_of_stream: bool,
) -> Result<(), SocketError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| SocketError::Frame(format!("payload too large: {} bytes", payload.len())))?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer
        .write_u8(if end_of_stream { FLAG_END } else { FLAG_DATA })
        .await?;
    Ok(())
}

/// Reads one frame into `buf`, returning `(payload_len, end_of_stream)`.
///
/// `buf` is resized to the payload length, never beyond `max_len`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> Result<(usize, bool), SocketError> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader.read(&mut len_bytes[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                SocketError::ChannelClosed
            } else {
                SocketError::Frame("truncated length prefix".into())
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(SocketError::Frame(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        )));
    }

    buf.resize(len, 0);
    reader
        .read_exact(&mut buf[..len])
        .await
        .map_err(truncated)?;
    let flag = reader.read_u8().await.map_err(truncated)?;

    match flag {
        FLAG_DATA => Ok((len, false)),
        FLAG_END => Ok((len, true)),
        other => Err(SocketError::Frame(format!("invalid flag byte 0x{other:02x}"))),
    }
}

/// Writes the authentication response byte and flushes.
pub async fn write_auth_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accepted: bool,
) -> Result<(), SocketError> {
    writer
        .write_u8(if accepted { AUTH_OK } else { AUTH_REJECTED })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the authentication response byte.
pub async fn read_auth_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<bool, SocketError> {
    let byte = reader.read_u8().await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            SocketError::Connection("peer closed during handshake".into())
        } else {
            e.into()
        }
    })?;
    match byte {
        AUTH_OK => Ok(true),
        AUTH_REJECTED => Ok(false),
        other => Err(SocketError::Frame(format!(
            "invalid auth response 0x{other:02x}"
        ))),
    }
}

fn truncated(e: std::io::Error) -> SocketError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SocketError::Frame("truncated frame".into())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"ciphertext", false).await.unwrap();
        assert_eq!(wire.len(), 10 + FRAME_OVERHEAD);
        assert_eq!(&wire[..4], &10u32.to_be_bytes());

        let mut cursor = &wire[..];
        let mut buf = Vec::new();
        let (len, end) = read_frame(&mut cursor, &mut buf, 64).await.unwrap();
        assert_eq!(len, 10);
        assert!(!end);
        assert_eq!(buf, b"ciphertext");
    }

    #[tokio::test]
    async fn end_frame_is_empty_with_flag() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[], true).await.unwrap();
        assert_eq!(wire, [0, 0, 0, 0, FLAG_END]);

        let mut cursor = &wire[..];
        let mut buf = Vec::new();
        assert_eq!(read_frame(&mut cursor, &mut buf, 64).await.unwrap(), (0, true));
    }

    #[tokio::test]
    async fn eof_at_boundary_is_channel_closed() {
        let mut cursor: &[u8] = &[];
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame(&mut cursor, &mut buf, 64).await,
            Err(SocketError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn eof_inside_frame_is_truncated() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abcdef", false).await.unwrap();
        let mut buf = Vec::new();

        for cut in [2, 4, 7, wire.len() - 1] {
            let mut cursor = &wire[..cut];
            let err = read_frame(&mut cursor, &mut buf, 64).await.unwrap_err();
            assert!(matches!(err, SocketError::Frame(_)), "cut at {cut}: {err}");
        }
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[0u8; 32], false).await.unwrap();
        let mut cursor = &wire[..];
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame(&mut cursor, &mut buf, 16).await,
            Err(SocketError::Frame(_))
        ));
        assert!(buf.capacity() < 32);
    }

    #[tokio::test]
    async fn bad_flag_rejected() {
        let wire = [0, 0, 0, 1, 0xAA, 0x07];
        let mut cursor = &wire[..];
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame(&mut cursor, &mut buf, 16).await,
            Err(SocketError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn auth_response_accepted() {
        let mut buf = Vec::new();
        write_auth_response(&mut buf, true).await.unwrap();
        assert_eq!(buf[0], AUTH_OK);

        let mut cursor = &buf[..];
        assert!(read_auth_response(&mut cursor).await.unwrap());
    }

    #[tokio::test]
    async fn auth_response_rejected() {
        let mut buf = Vec::new();
        write_auth_response(&mut buf, false).await.unwrap();
        assert_eq!(buf[0], AUTH_REJECTED);

        let mut cursor = &buf[..];
        assert!(!read_auth_response(&mut cursor).await.unwrap());
    }

    #[tokio::test]
    async fn auth_response_eof_is_connection_error() {
        let mut cursor: &[u8] = &[];
        assert!(matches!(
            read_auth_response(&mut cursor).await,
            Err(SocketError::Connection(_))
        ));
    }
}
