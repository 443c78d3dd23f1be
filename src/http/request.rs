//! Request model and incremental request-head parser.
//!
//! # Responsibilities
//! - Parse the request line and header block from a [`FrameBuffer`]
//! - Enforce the header-block size cap while bytes are still arriving
//! - Select the body framing strategy for the request
//!
//! # Design Decisions
//! - Header names are stored lower-cased; lookups are case-insensitive anyway
//! - Header order and duplicates are preserved
//! - `Transfer-Encoding: chunked` wins over `Content-Length`

use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::http::body::BodyReader;
use crate::http::buffer::FrameBuffer;
use crate::http::error::HttpError;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Any other token.
    Extension(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "CONNECT" => Method::Connect,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            other => Method::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Extension(s) => s,
        }
    }

    /// GET and HEAD requests never carry a body.
    pub fn ignores_body(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version from the request line, e.g. `HTTP/1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    fn parse(token: &str) -> Option<Self> {
        let digits = token.strip_prefix("HTTP/")?.as_bytes();
        match digits {
            [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
                Some(Version {
                    major: major - b'0',
                    minor: minor - b'0',
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// One header field. Names produced by the parser are lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing ones with the same name.
    ///
    /// CR and LF are removed from `value` so it can never end the field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let mut value = value.into();
        if value.contains(['\r', '\n']) {
            value.retain(|c| c != '\r' && c != '\n');
        }
        self.0.push(Header {
            name: name.into(),
            value,
        });
    }

    /// Replace every header called `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True if any comma-separated element of any `name` header equals
    /// `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed request head. The body is consumed separately through a
/// [`BodyReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

impl Request {
    /// Path component of the target, without the query string.
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(idx) => &self.target[..idx],
            None => &self.target,
        }
    }

    /// Whether the client allows the connection to stay open afterwards.
    pub fn wants_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.version >= Version::HTTP_11 || self.headers.has_token("connection", "keep-alive")
    }

    /// Whether the client asked for an interim `100 Continue`.
    pub fn expects_continue(&self) -> bool {
        self.version >= Version::HTTP_11
            && self
                .headers
                .get("expect")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }

    /// Whether this looks like a WebSocket upgrade request.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.headers.has_token("upgrade", "websocket")
            && self.headers.has_token("connection", "upgrade")
    }
}

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: Option<u64>,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8192,
            max_body_bytes: None,
        }
    }
}

/// Parse one request head from `buffer`.
///
/// Returns `Ok(None)` if the stream ended cleanly before any byte of a new
/// request arrived. Bytes following the head stay in `buffer`.
pub async fn parse_request<R>(
    buffer: &mut FrameBuffer<R>,
    limits: &ParseLimits,
) -> Result<Option<(Request, BodyReader)>, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut consumed = 0usize;
    // Bytes of empty lines seen before the request line.
    let mut blank = 0usize;

    let request_line = loop {
        match next_line(buffer, &mut consumed, limits.max_header_bytes).await {
            Ok(line) if line.as_ref() == b"\r\n" => {
                blank += line.len();
                continue;
            }
            Ok(line) => break line,
            Err(HttpError::UnexpectedEof) if consumed == blank && buffer.is_empty() => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        }
    };
    let (method, target, version) = parse_request_line(&request_line)?;

    let mut headers = Headers::new();
    loop {
        let line = next_line(buffer, &mut consumed, limits.max_header_bytes).await?;
        if line.as_ref() == b"\r\n" {
            break;
        }
        let (name, value) = parse_header_line(&line)?;
        headers.append(name, value);
    }

    let request = Request {
        method,
        target,
        version,
        headers,
    };
    let body = select_body(&request, limits)?;
    Ok(Some((request, body)))
}

/// Take one CRLF-terminated line, filling as needed, and charge it against
/// `cap`. Unterminated bytes already buffered count against the cap too.
pub(crate) async fn next_line<R>(
    buffer: &mut FrameBuffer<R>,
    consumed: &mut usize,
    cap: usize,
) -> Result<Bytes, HttpError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(line) = buffer.take_line() {
            *consumed += line.len();
            if *consumed > cap {
                return Err(HttpError::HeaderTooLarge { limit: cap });
            }
            return Ok(line);
        }
        if *consumed + buffer.len() > cap {
            return Err(HttpError::HeaderTooLarge { limit: cap });
        }
        if buffer.is_eof() || buffer.fill().await? == 0 {
            return Err(HttpError::UnexpectedEof);
        }
    }
}

fn strip_crlf(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n").unwrap_or(line)
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), HttpError> {
    let line = std::str::from_utf8(strip_crlf(line)).map_err(|_| HttpError::MalformedRequestLine)?;
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::MalformedRequestLine);
    };
    if !is_token(method) || target.is_empty() || target.contains(char::is_whitespace) {
        return Err(HttpError::MalformedRequestLine);
    }
    let version = Version::parse(version).ok_or(HttpError::MalformedRequestLine)?;
    Ok((Method::from_token(method), target.to_string(), version))
}

pub(crate) fn parse_header_line(line: &[u8]) -> Result<(String, String), HttpError> {
    let line = std::str::from_utf8(strip_crlf(line)).map_err(|_| HttpError::MalformedHeader)?;
    let (name, value) = line.split_once(':').ok_or(HttpError::MalformedHeader)?;
    let name = name.trim();
    if !is_token(name) {
        return Err(HttpError::MalformedHeader);
    }
    let value = value.trim();
    if value.contains(['\r', '\n']) {
        return Err(HttpError::MalformedHeader);
    }
    Ok((name.to_ascii_lowercase(), value.to_string()))
}

fn select_body(request: &Request, limits: &ParseLimits) -> Result<BodyReader, HttpError> {
    if request.method.ignores_body() {
        return Ok(BodyReader::empty());
    }

    if request.headers.has_token("transfer-encoding", "chunked") {
        if request.headers.contains("content-length") {
            tracing::warn!(
                method = %request.method,
                target = %request.target,
                "Request carries both Transfer-Encoding and Content-Length; using chunked framing"
            );
        }
        return Ok(BodyReader::chunked());
    }

    let mut length: Option<u64> = None;
    for value in request.headers.get_all("content-length") {
        let parsed = parse_content_length(value)?;
        if length.is_some_and(|prev| prev != parsed) {
            return Err(HttpError::InvalidContentLength(value.to_string()));
        }
        length = Some(parsed);
    }

    match length {
        Some(length) => {
            if let Some(limit) = limits.max_body_bytes {
                if length > limit {
                    return Err(HttpError::PayloadTooLarge { length, limit });
                }
            }
            Ok(BodyReader::bounded(length))
        }
        None => Ok(BodyReader::empty()),
    }
}

fn parse_content_length(value: &str) -> Result<u64, HttpError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpError::InvalidContentLength(value.to_string()));
    }
    value
        .parse::<u64>()
        .map_err(|_| HttpError::InvalidContentLength(value.to_string()))
}
