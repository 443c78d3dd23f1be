//! Request body consumption.
//!
//! A [`BodyReader`] is a cursor over the body bytes that follow a request
//! head. It never owns the transport: every read borrows the connection's
//! [`FrameBuffer`], so bytes buffered during header parsing are served
//! first and anything past the body stays put for the next request.

use tokio::io::AsyncRead;

use crate::http::buffer::FrameBuffer;
use crate::http::error::HttpError;
use crate::http::request::next_line;

/// Longest accepted chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 4096;
/// Cap on the trailer section after the last chunk.
const MAX_TRAILER_BYTES: usize = 8192;

/// Framing strategy of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Bounded,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Waiting for a chunk-size line.
    Size,
    /// Inside a chunk's payload.
    Data { remaining: u64 },
    /// Payload done, CRLF still unread.
    DataEnd,
    /// Last chunk seen, reading trailer fields.
    Trailers { consumed: usize },
    Done,
}

/// Stateful cursor over the remaining body bytes of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyReader {
    inner: Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inner {
    Empty,
    Bounded { remaining: u64 },
    Chunked { state: ChunkState },
}

impl BodyReader {
    /// No body at all.
    pub fn empty() -> Self {
        Self { inner: Inner::Empty }
    }

    /// A body of exactly `length` bytes.
    pub fn bounded(length: u64) -> Self {
        Self {
            inner: Inner::Bounded { remaining: length },
        }
    }

    /// A `Transfer-Encoding: chunked` body.
    pub fn chunked() -> Self {
        Self {
            inner: Inner::Chunked {
                state: ChunkState::Size,
            },
        }
    }

    pub fn kind(&self) -> BodyKind {
        match self.inner {
            Inner::Empty => BodyKind::Empty,
            Inner::Bounded { .. } => BodyKind::Bounded,
            Inner::Chunked { .. } => BodyKind::Chunked,
        }
    }

    /// Bytes still to come, when known up front.
    pub fn remaining_hint(&self) -> Option<u64> {
        match self.inner {
            Inner::Empty => Some(0),
            Inner::Bounded { remaining } => Some(remaining),
            Inner::Chunked {
                state: ChunkState::Done,
            } => Some(0),
            Inner::Chunked { .. } => None,
        }
    }

    /// True once end-of-data has been reported.
    pub fn is_done(&self) -> bool {
        self.remaining_hint() == Some(0)
    }

    /// Read the next body bytes into `out`.
    ///
    /// Returns `Ok(0)` at end-of-data (or when `out` is empty). End-of-stream
    /// before the body is complete is an error, never end-of-data.
    pub async fn read<R>(
        &mut self,
        src: &mut FrameBuffer<R>,
        out: &mut [u8],
    ) -> Result<usize, HttpError>
    where
        R: AsyncRead + Unpin,
    {
        if out.is_empty() {
            return Ok(0);
        }
        match &mut self.inner {
            Inner::Empty => Ok(0),
            Inner::Bounded { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let want = clamp(out.len(), *remaining);
                let n = src.read_into(&mut out[..want]).await?;
                if n == 0 {
                    return Err(HttpError::UnexpectedEof);
                }
                *remaining -= n as u64;
                Ok(n)
            }
            Inner::Chunked { state } => read_chunked(state, src, out).await,
        }
    }

    /// Read and discard everything left. Returns the number of bytes dropped.
    ///
    /// Fails with `PayloadTooLarge` once more than `limit` bytes were dropped.
    pub async fn drain<R>(
        &mut self,
        src: &mut FrameBuffer<R>,
        limit: Option<u64>,
    ) -> Result<u64, HttpError>
    where
        R: AsyncRead + Unpin,
    {
        let mut scratch = [0u8; 4096];
        let mut total = 0u64;
        loop {
            let n = self.read(src, &mut scratch).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
            if let Some(limit) = limit {
                if total > limit {
                    return Err(HttpError::PayloadTooLarge {
                        length: total,
                        limit,
                    });
                }
            }
        }
    }
}

fn clamp(len: usize, remaining: u64) -> usize {
    usize::try_from(remaining).map_or(len, |r| r.min(len))
}

async fn read_chunked<R>(
    state: &mut ChunkState,
    src: &mut FrameBuffer<R>,
    out: &mut [u8],
) -> Result<usize, HttpError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match *state {
            ChunkState::Size => {
                let mut used = 0;
                let line = next_line(src, &mut used, MAX_CHUNK_LINE)
                    .await
                    .map_err(|e| match e {
                        HttpError::HeaderTooLarge { .. } => HttpError::MalformedChunkSize,
                        other => other,
                    })?;
                let size = parse_chunk_size(&line)?;
                *state = if size == 0 {
                    ChunkState::Trailers { consumed: 0 }
                } else {
                    ChunkState::Data { remaining: size }
                };
            }
            ChunkState::Data { remaining } => {
                let want = clamp(out.len(), remaining);
                let n = src.read_into(&mut out[..want]).await?;
                if n == 0 {
                    return Err(HttpError::UnexpectedEof);
                }
                let left = remaining - n as u64;
                *state = if left == 0 {
                    ChunkState::DataEnd
                } else {
                    ChunkState::Data { remaining: left }
                };
                return Ok(n);
            }
            ChunkState::DataEnd => {
                while src.len() < 2 {
                    if src.fill().await? == 0 {
                        return Err(HttpError::UnexpectedEof);
                    }
                }
                match src.take_exact(2) {
                    Some(crlf) if crlf.as_ref() == b"\r\n" => *state = ChunkState::Size,
                    _ => return Err(HttpError::MissingChunkTerminator),
                }
            }
            ChunkState::Trailers { mut consumed } => {
                let line = next_line(src, &mut consumed, MAX_TRAILER_BYTES).await?;
                *state = if line.as_ref() == b"\r\n" {
                    ChunkState::Done
                } else {
                    ChunkState::Trailers { consumed }
                };
            }
            ChunkState::Done => return Ok(0),
        }
    }
}

/// Parse `<hex>[;ext]\r\n`.
fn parse_chunk_size(line: &[u8]) -> Result<u64, HttpError> {
    let line = line.strip_suffix(b"\r\n").unwrap_or(line);
    let size = match line.iter().position(|&b| b == b';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| HttpError::MalformedChunkSize)?
        .trim_matches([' ', '\t']);
    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HttpError::MalformedChunkSize);
    }
    u64::from_str_radix(size, 16).map_err(|_| HttpError::MalformedChunkSize)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all<R: AsyncRead + Unpin>(
        body: &mut BodyReader,
        src: &mut FrameBuffer<R>,
    ) -> Result<Vec<u8>, HttpError> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = body.read(src, &mut buf).await?;
            if n == 0 {
                return Ok(collected);
            }
            collected.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn bounded_stops_at_length_and_leaves_rest() {
        let io = tokio_test::io::Builder::new().read(b"hello worldGET").build();
        let mut src = FrameBuffer::new(io);
        src.fill().await.unwrap();
        let mut body = BodyReader::bounded(11);

        assert_eq!(read_all(&mut body, &mut src).await.unwrap(), b"hello world");
        assert!(body.is_done());
        assert_eq!(src.buffered(), b"GET");
    }

    #[tokio::test]
    async fn bounded_zero_is_immediately_done() {
        let io = tokio_test::io::Builder::new().build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::bounded(0);
        let mut buf = [0u8; 4];
        assert_eq!(body.read(&mut src, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bounded_short_stream_is_an_error() {
        let io = tokio_test::io::Builder::new().read(b"abc").build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::bounded(10);
        assert!(matches!(
            read_all(&mut body, &mut src).await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn chunked_decodes_with_extensions_and_trailers() {
        let io = tokio_test::io::Builder::new()
            .read(b"4;name=value\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\nExpires: never\r\n\r\nNEXT")
            .build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();

        assert_eq!(
            read_all(&mut body, &mut src).await.unwrap(),
            b"Wikipedia in\r\n\r\nchunks."
        );
        assert!(body.is_done());
        assert_eq!(src.buffered(), b"NEXT");
    }

    #[tokio::test]
    async fn chunk_bytes_are_served_before_the_chunk_completes() {
        let io = tokio_test::io::Builder::new()
            .read(b"a\r\n01234")
            .read(b"56789\r\n0\r\n\r\n")
            .build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();
        let mut buf = [0u8; 64];

        let n = body.read(&mut src, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"01234");
        let n = body.read(&mut src, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"56789");
        assert_eq!(body.read(&mut src, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_chunk_size_is_an_error() {
        let io = tokio_test::io::Builder::new().read(b"zz\r\nabc\r\n").build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();
        assert!(matches!(
            read_all(&mut body, &mut src).await,
            Err(HttpError::MalformedChunkSize)
        ));
    }

    #[tokio::test]
    async fn missing_chunk_crlf_is_an_error() {
        let io = tokio_test::io::Builder::new().read(b"3\r\nabcXY0\r\n\r\n").build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();
        assert!(matches!(
            read_all(&mut body, &mut src).await,
            Err(HttpError::MissingChunkTerminator)
        ));
    }

    #[tokio::test]
    async fn truncated_chunked_body_is_an_error() {
        let io = tokio_test::io::Builder::new().read(b"10\r\nshort").build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();
        assert!(matches!(
            read_all(&mut body, &mut src).await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn drain_discards_the_rest() {
        let io = tokio_test::io::Builder::new()
            .read(b"3\r\nabc\r\n2\r\nde\r\n0\r\n\r\nGET / HTTP/1.1\r\n")
            .build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();
        assert_eq!(body.drain(&mut src, None).await.unwrap(), 5);
        assert_eq!(src.buffered(), b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn drain_stops_at_limit() {
        let io = tokio_test::io::Builder::new()
            .read(b"8\r\n12345678\r\n0\r\n\r\n")
            .build();
        let mut src = FrameBuffer::new(io);
        let mut body = BodyReader::chunked();
        assert!(matches!(
            body.drain(&mut src, Some(4)).await,
            Err(HttpError::PayloadTooLarge { limit: 4, .. })
        ));
    }

    #[test]
    fn chunk_size_parsing() {
        assert_eq!(parse_chunk_size(b"1A\r\n").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"ff ; ext\r\n").unwrap(), 255);
        assert!(parse_chunk_size(b"\r\n").is_err());
        assert!(parse_chunk_size(b"-1\r\n").is_err());
        assert!(parse_chunk_size(b"11111111111111111\r\n").is_err());
    }
}
