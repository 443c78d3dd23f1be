//! Response model and serialization.
//!
//! # Responsibilities
//! - Describe a response as status + headers + one of three body framings
//! - Serialize the status line and header block in a single write
//! - Stream bodies with fixed-length or chunked framing
//!
//! # Design Decisions
//! - The writer owns the framing headers; handler-supplied
//!   `Content-Length`/`Transfer-Encoding` values are replaced
//! - A fixed length that disagrees with the source is an error, never padded
//!   or truncated
//! - HEAD responses carry the same framing headers as GET, with no body bytes

use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::error::HttpError;
use crate::http::request::Headers;

/// Largest piece read from a body source per write.
const WRITE_CHUNK: usize = 16 * 1024;
/// Fixed in-memory bodies up to this size share the header block's write.
const INLINE_BODY: usize = 16 * 1024;

/// Terminal chunk of a chunked body (no trailers).
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Where response body bytes come from.
pub enum BodySource {
    Bytes(Bytes),
    Reader(Pin<Box<dyn AsyncRead + Send>>),
}

impl BodySource {
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        BodySource::Reader(Box::pin(reader))
    }

    /// Next piece of at most `max` bytes. Empty means end-of-data.
    async fn next_chunk(&mut self, max: usize) -> std::io::Result<Bytes> {
        match self {
            BodySource::Bytes(bytes) => {
                let n = max.min(bytes.len());
                Ok(bytes.split_to(n))
            }
            BodySource::Reader(reader) => {
                let mut buf = BytesMut::with_capacity(max);
                reader.as_mut().take(max as u64).read_buf(&mut buf).await?;
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            BodySource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<Bytes> for BodySource {
    fn from(bytes: Bytes) -> Self {
        BodySource::Bytes(bytes)
    }
}

/// Body framing of a response.
#[derive(Debug)]
pub enum ResponseBody {
    /// `Content-Length: len`, exactly `len` bytes from `source`.
    Fixed { len: u64, source: BodySource },
    /// `Transfer-Encoding: chunked`, until `source` ends.
    Chunked(BodySource),
    /// No body bytes.
    None,
}

/// A response ready to be written.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl Response {
    /// A response with no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ResponseBody::None,
        }
    }

    /// Plain-text response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_bytes(body.into())
    }

    /// Plain-text response whose body is the status's reason phrase.
    pub fn error(status: u16) -> Self {
        Self::text(status, format!("{}\n", reason_phrase(status)))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Fixed-length body from memory.
    pub fn with_bytes(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = ResponseBody::Fixed {
            len: body.len() as u64,
            source: BodySource::Bytes(body),
        };
        self
    }

    /// Fixed-length body streamed from `reader`, which must yield exactly
    /// `len` bytes.
    pub fn with_reader<R>(mut self, len: u64, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        self.body = ResponseBody::Fixed {
            len,
            source: BodySource::reader(reader),
        };
        self
    }

    /// Chunked body of unknown length.
    pub fn with_chunked(mut self, source: BodySource) -> Self {
        self.body = ResponseBody::Chunked(source);
        self
    }

    /// Reject a fixed length that an in-memory source cannot honor. Runs
    /// before anything is written, so the caller can still answer with 500.
    pub fn check_framing(&self) -> Result<(), HttpError> {
        if let ResponseBody::Fixed {
            len,
            source: BodySource::Bytes(bytes),
        } = &self.body
        {
            if *len != bytes.len() as u64 {
                return Err(HttpError::BodyLengthMismatch {
                    declared: *len,
                    actual: bytes.len() as u64,
                });
            }
        }
        Ok(())
    }
}

/// 1xx, 204 and 304 responses never carry a body.
pub fn status_allows_body(status: u16) -> bool {
    !((100..200).contains(&status) || status == 204 || status == 304)
}

/// Canonical reason phrase for `status`.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "Unknown Status",
    }
}

/// How the writer treats the `Connection` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHeader {
    /// Leave the handler's headers alone (upgrade responses).
    Preserve,
    /// `Connection: keep-alive`, for HTTP/1.0 clients that asked for it.
    KeepAlive,
    /// `Connection: close`.
    Close,
}

/// Per-response writer options.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Suppress body bytes (HEAD request).
    pub head_request: bool,
    pub connection: ConnectionHeader,
    /// The peer understands chunked coding. When false a `Chunked` body is
    /// sent raw and delimited by closing the connection.
    pub chunked_allowed: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            head_request: false,
            connection: ConnectionHeader::Preserve,
            chunked_allowed: true,
        }
    }
}

/// Append one data chunk in chunked wire format. Empty data writes nothing.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

/// Serializes responses onto a transport.
pub struct ResponseWriter<'a, W> {
    io: &'a mut W,
}

impl<'a, W> ResponseWriter<'a, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: &'a mut W) -> Self {
        Self { io }
    }

    /// Write a full response. Returns the number of body bytes written.
    pub async fn send(&mut self, response: Response, opts: WriteOptions) -> Result<u64, HttpError> {
        let Response {
            status,
            headers,
            body,
        } = response;

        let mut head = encode_head(status, &headers, &body, &opts);
        let body = if opts.head_request || !status_allows_body(status) {
            ResponseBody::None
        } else {
            body
        };

        let written = match body {
            ResponseBody::Fixed {
                len,
                source: BodySource::Bytes(bytes),
            } if bytes.len() <= INLINE_BODY && len == bytes.len() as u64 => {
                head.extend_from_slice(&bytes);
                self.io.write_all(&head).await?;
                len
            }
            ResponseBody::Chunked(source) if !opts.chunked_allowed => {
                self.io.write_all(&head).await?;
                self.write_unframed(source).await?
            }
            body => {
                self.io.write_all(&head).await?;
                self.write_body(body).await?
            }
        };
        self.io.flush().await?;
        Ok(written)
    }

    /// Stream `body` using its framing. Returns the number of payload bytes.
    pub async fn write_body(&mut self, body: ResponseBody) -> Result<u64, HttpError> {
        match body {
            ResponseBody::None => Ok(0),
            ResponseBody::Fixed { len, source } => self.write_fixed(len, source).await,
            ResponseBody::Chunked(source) => self.write_chunked(source).await,
        }
    }

    async fn write_fixed(&mut self, len: u64, mut source: BodySource) -> Result<u64, HttpError> {
        let mut written = 0u64;
        while written < len {
            let want = usize::try_from(len - written).map_or(WRITE_CHUNK, |n| n.min(WRITE_CHUNK));
            let chunk = source.next_chunk(want).await?;
            if chunk.is_empty() {
                return Err(HttpError::BodyLengthMismatch {
                    declared: len,
                    actual: written,
                });
            }
            self.io.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        let surplus = source.next_chunk(1).await?;
        if !surplus.is_empty() {
            return Err(HttpError::BodyLengthMismatch {
                declared: len,
                actual: written + surplus.len() as u64,
            });
        }
        Ok(written)
    }

    /// Copy `source` as-is; the end of the body is the end of the connection.
    async fn write_unframed(&mut self, mut source: BodySource) -> Result<u64, HttpError> {
        let mut written = 0u64;
        loop {
            let chunk = source.next_chunk(WRITE_CHUNK).await?;
            if chunk.is_empty() {
                return Ok(written);
            }
            self.io.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
    }

    async fn write_chunked(&mut self, mut source: BodySource) -> Result<u64, HttpError> {
        let mut written = 0u64;
        let mut frame = BytesMut::with_capacity(WRITE_CHUNK + 16);
        loop {
            let chunk = source.next_chunk(WRITE_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            frame.clear();
            encode_chunk(&chunk, &mut frame);
            self.io.write_all(&frame).await?;
            written += chunk.len() as u64;
        }
        self.io.write_all(LAST_CHUNK).await?;
        Ok(written)
    }
}

fn encode_head(status: u16, headers: &Headers, body: &ResponseBody, opts: &WriteOptions) -> BytesMut {
    let connection = opts.connection;
    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).as_bytes());

    for header in headers.iter() {
        let framing = header.name.eq_ignore_ascii_case("content-length")
            || header.name.eq_ignore_ascii_case("transfer-encoding");
        let replaced = connection != ConnectionHeader::Preserve
            && header.name.eq_ignore_ascii_case("connection");
        if framing || replaced {
            continue;
        }
        push_header(&mut head, &header.name, &header.value);
    }

    if status_allows_body(status) {
        match body {
            ResponseBody::Fixed { len, .. } => push_header(&mut head, "Content-Length", &len.to_string()),
            ResponseBody::Chunked(_) if opts.chunked_allowed => {
                push_header(&mut head, "Transfer-Encoding", "chunked")
            }
            ResponseBody::Chunked(_) => {}
            ResponseBody::None => push_header(&mut head, "Content-Length", "0"),
        }
    }

    match connection {
        ConnectionHeader::Preserve => {}
        ConnectionHeader::KeepAlive => push_header(&mut head, "Connection", "keep-alive"),
        ConnectionHeader::Close => push_header(&mut head, "Connection", "close"),
    }

    head.extend_from_slice(b"\r\n");
    head
}

fn push_header(head: &mut BytesMut, name: &str, value: &str) {
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value.as_bytes());
    head.extend_from_slice(b"\r\n");
}
