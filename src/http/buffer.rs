//! Read-side buffering over a byte-stream transport.
//!
//! [`FrameBuffer`] owns the transport for the lifetime of the HTTP phase of a
//! connection. Bytes that arrive ahead of the current message (pipelined
//! requests, early WebSocket frames) stay in the buffer and are carried into
//! the next parse cycle or handed over on upgrade.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default number of bytes reserved for each transport read.
pub const DEFAULT_READ_SIZE: usize = 8192;

/// Accumulates transport bytes and exposes delimiter- and length-based
/// extraction.
///
/// The buffer never limits its own growth. Callers that accumulate
/// (the header parser, the chunk-size reader) enforce caps by checking
/// [`FrameBuffer::len`] before every [`FrameBuffer::fill`].
#[derive(Debug)]
pub struct FrameBuffer<R> {
    io: R,
    buf: BytesMut,
    /// Prefix of `buf` already searched for CRLF without success.
    scanned: usize,
    eof: bool,
    read_size: usize,
}

impl<R> FrameBuffer<R> {
    /// Wrap a transport with the default read size.
    pub fn new(io: R) -> Self {
        Self::with_read_size(io, DEFAULT_READ_SIZE)
    }

    /// Wrap a transport, reserving `read_size` bytes per read.
    pub fn with_read_size(io: R, read_size: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(read_size),
            scanned: 0,
            eof: false,
            read_size: read_size.max(1),
        }
    }

    /// Remove and return the next line including its `\r\n`.
    ///
    /// Returns `None` without consuming anything if no terminator is buffered.
    pub fn take_line(&mut self) -> Option<Bytes> {
        // A '\r' at the end of the previous scan may pair with a new '\n'.
        let start = self.scanned.saturating_sub(1);
        match self.buf[start..].windows(2).position(|w| w == b"\r\n") {
            Some(pos) => {
                self.scanned = 0;
                Some(self.buf.split_to(start + pos + 2).freeze())
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Remove and return exactly `n` bytes, or `None` if fewer are buffered.
    pub fn take_exact(&mut self, n: usize) -> Option<Bytes> {
        if self.buf.len() < n {
            return None;
        }
        self.scanned = 0;
        Some(self.buf.split_to(n).freeze())
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True once a read has returned end-of-stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// The transport, for writing responses.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.io
    }

    /// Give up the transport together with any unconsumed bytes.
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.io, self.buf)
    }
}

impl<R: AsyncRead + Unpin> FrameBuffer<R> {
    /// Perform one transport read and append the result.
    ///
    /// Returns the number of bytes appended; `0` means end-of-stream.
    pub async fn fill(&mut self) -> std::io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(self.read_size);
        let n = self.io.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Copy buffered bytes into `out`, or read from the transport directly
    /// when nothing is buffered. Returns `0` only at end-of-stream.
    pub async fn read_into(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.buf.is_empty() {
            let n = out.len().min(self.buf.len());
            out[..n].copy_from_slice(&self.buf[..n]);
            self.buf.advance(n);
            self.scanned = 0;
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        let n = self.io.read(out).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }
}
