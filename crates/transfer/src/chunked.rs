use tokio::io::{AsyncRead, AsyncReadExt};

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Reads an async byte source in fixed-size chunks.
///
/// A single buffer of `chunk_size` bytes is allocated up front and reused
/// for every chunk. Each chunk is filled completely unless the source hits
/// EOF, so only the final chunk may be short. An empty source yields no
/// chunks at all.
pub struct ChunkSource<R> {
    reader: R,
    buf: Vec<u8>,
    offset: u64,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkSource<R> {
    /// Wraps `reader`. A `chunk_size` of 0 is treated as 1.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; chunk_size.max(1)],
            offset: 0,
            eof: false,
        }
    }

    /// Reads the next chunk, or `None` once the source is exhausted.
    ///
    /// The returned slice borrows the internal buffer and is mutable so
    /// callers can encrypt in place.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<&mut [u8]>> {
        if self.eof {
            return Ok(None);
        }

        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self.reader.read(&mut self.buf[filled..]).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        self.offset += filled as u64;
        Ok(Some(&mut self.buf[..filled]))
    }

    /// Plaintext bytes handed out so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the reusable buffer. Never grows.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn chunk_size(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that returns at most `step` bytes per read call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let end = (self.pos + self.step)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            let pos = self.pos;
            buf.put_slice(&self.data[pos..end]);
            self.pos = end;
            std::task::Poll::Ready(Ok(()))
        }
    }

    async fn collect<R: AsyncRead + Unpin>(mut src: ChunkSource<R>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = src.next_chunk().await.unwrap() {
            out.push(chunk.to_vec());
        }
        out
    }

    #[tokio::test]
    async fn splits_with_short_tail() {
        let chunks = collect(ChunkSource::new(&b"abcdefghij"[..], 4)).await;
        assert_eq!(chunks, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let chunks = collect(ChunkSource::new(&b"abcdefgh"[..], 4)).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4));
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        let mut src = ChunkSource::new(&b""[..], 4);
        assert!(src.next_chunk().await.unwrap().is_none());
        assert!(src.next_chunk().await.unwrap().is_none());
        assert_eq!(src.offset(), 0);
    }

    #[tokio::test]
    async fn fills_chunks_from_short_reads() {
        let reader = Trickle {
            data: (0..100u8).collect(),
            pos: 0,
            step: 3,
        };
        let chunks = collect(ChunkSource::new(reader, 10)).await;
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.len() == 10));
        assert_eq!(chunks.concat(), (0..100u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn buffer_is_reused() {
        let data = vec![1u8; 4096 * 8];
        let mut src = ChunkSource::new(&data[..], 4096);
        while src.next_chunk().await.unwrap().is_some() {
            assert_eq!(src.buffer_capacity(), 4096);
        }
        assert_eq!(src.offset(), data.len() as u64);
    }
}
