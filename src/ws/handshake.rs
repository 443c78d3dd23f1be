//! WebSocket opening handshake.
//!
//! # Responsibilities
//! - Validate an upgrade request and compute `Sec-WebSocket-Accept`
//! - Build the `101 Switching Protocols` response
//! - Drive the client side: request, response verification, socket setup

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::WebSocketConfig;
use crate::http::buffer::FrameBuffer;
use crate::http::error::HttpError;
use crate::http::request::{next_line, parse_header_line, Headers, Method, Request, Version};
use crate::http::response::Response;
use crate::ws::frame::Role;
use crate::ws::messenger::WebSocket;

/// Magic value appended to the key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// The only protocol version this crate speaks.
const WS_VERSION: &str = "13";
/// Cap on the response head read by the client side.
const MAX_RESPONSE_HEAD: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("upgrade requires GET")]
    Method,

    #[error("upgrade requires HTTP/1.1 or later")]
    Version,

    #[error("missing `Upgrade: websocket`")]
    MissingUpgrade,

    #[error("missing `Connection: upgrade`")]
    MissingConnection,

    #[error("missing or malformed Sec-WebSocket-Key")]
    InvalidKey,

    #[error("unsupported Sec-WebSocket-Version {0:?}")]
    UnsupportedVersion(String),

    #[error("server answered with status {0}")]
    UnexpectedStatus(u16),

    #[error("Sec-WebSocket-Accept does not match the key")]
    AcceptMismatch,

    #[error("malformed response head")]
    MalformedResponse,

    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Compute `Sec-WebSocket-Accept` for `key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Validate a server-side upgrade request. Returns the accept value.
pub fn accept(request: &Request) -> Result<String, HandshakeError> {
    if request.method != Method::Get {
        return Err(HandshakeError::Method);
    }
    if request.version < Version::HTTP_11 {
        return Err(HandshakeError::Version);
    }
    if !request.headers.has_token("upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !request.headers.has_token("connection", "upgrade") {
        return Err(HandshakeError::MissingConnection);
    }
    if let Some(version) = request.headers.get("sec-websocket-version") {
        if version.trim() != WS_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }
    }

    let key = request
        .headers
        .get("sec-websocket-key")
        .map(str::trim)
        .ok_or(HandshakeError::InvalidKey)?;
    match STANDARD.decode(key) {
        Ok(raw) if raw.len() == 16 => Ok(accept_key(key)),
        _ => Err(HandshakeError::InvalidKey),
    }
}

/// The `101 Switching Protocols` response for `accept`.
pub fn switching_protocols(accept: &str) -> Response {
    Response::new(101)
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Accept", accept)
}

/// Fresh random `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// Serialized client upgrade request for `path` on `host`.
pub fn client_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {WS_VERSION}\r\n\r\n"
    )
}

/// Check a server's handshake response against the key we sent.
pub fn verify_response(key: &str, status: u16, headers: &Headers) -> Result<(), HandshakeError> {
    if status != 101 {
        return Err(HandshakeError::UnexpectedStatus(status));
    }
    if !headers.has_token("upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !headers.has_token("connection", "upgrade") {
        return Err(HandshakeError::MissingConnection);
    }
    match headers.get("sec-websocket-accept") {
        Some(value) if value.trim() == accept_key(key) => Ok(()),
        _ => Err(HandshakeError::AcceptMismatch),
    }
}

/// Run the client handshake over `io` and start a client-role socket.
pub async fn connect<S>(
    io: S,
    host: &str,
    path: &str,
    config: &WebSocketConfig,
) -> Result<WebSocket, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let key = generate_key();
    let mut buffer = FrameBuffer::new(io);
    let io = buffer.get_mut();
    io.write_all(client_request(host, path, &key).as_bytes())
        .await
        .map_err(HttpError::from)?;
    io.flush().await.map_err(HttpError::from)?;

    let (status, headers) = read_response_head(&mut buffer).await?;
    verify_response(&key, status, &headers)?;

    let (io, leftover) = buffer.into_parts();
    Ok(WebSocket::spawn(io, leftover, Role::Client, config))
}

async fn read_response_head<R>(buffer: &mut FrameBuffer<R>) -> Result<(u16, Headers), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut consumed = 0;
    let status_line = next_line(buffer, &mut consumed, MAX_RESPONSE_HEAD).await?;
    let status = std::str::from_utf8(&status_line)
        .ok()
        .and_then(|line| {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next()?;
            let code = parts.next()?.trim();
            version.starts_with("HTTP/1.").then_some(code)?.parse::<u16>().ok()
        })
        .ok_or(HandshakeError::MalformedResponse)?;

    let mut headers = Headers::new();
    loop {
        let line = next_line(buffer, &mut consumed, MAX_RESPONSE_HEAD).await?;
        if line.as_ref() == b"\r\n" {
            return Ok((status, headers));
        }
        let (name, value) = parse_header_line(&line)?;
        headers.append(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request() -> Request {
        let mut headers = Headers::new();
        headers.append("host", "example.com");
        headers.append("upgrade", "websocket");
        headers.append("connection", "keep-alive, Upgrade");
        headers.append("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        headers.append("sec-websocket-version", "13");
        Request {
            method: Method::Get,
            target: "/chat".into(),
            version: Version::HTTP_11,
            headers,
        }
    }

    #[test]
    fn accept_value_matches_known_vector() {
        assert_eq!(
            accept(&upgrade_request()).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn rejects_bad_requests() {
        let mut req = upgrade_request();
        req.method = Method::Post;
        assert!(matches!(accept(&req), Err(HandshakeError::Method)));

        let mut req = upgrade_request();
        req.version = Version::HTTP_10;
        assert!(matches!(accept(&req), Err(HandshakeError::Version)));

        let mut req = upgrade_request();
        req.headers.set("sec-websocket-key", "c2hvcnQ=");
        assert!(matches!(accept(&req), Err(HandshakeError::InvalidKey)));

        let mut req = upgrade_request();
        req.headers.set("sec-websocket-version", "8");
        assert!(matches!(accept(&req), Err(HandshakeError::UnsupportedVersion(_))));

        let mut req = upgrade_request();
        req.headers.set("connection", "keep-alive");
        assert!(matches!(accept(&req), Err(HandshakeError::MissingConnection)));
    }

    #[test]
    fn version_header_is_optional() {
        let mut req = upgrade_request();
        req.headers.remove("sec-websocket-version");
        assert!(accept(&req).is_ok());
    }

    #[test]
    fn client_side_verification() {
        let key = generate_key();
        let mut headers = Headers::new();
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Accept", accept_key(&key));
        assert!(verify_response(&key, 101, &headers).is_ok());
        assert!(matches!(
            verify_response(&key, 200, &headers),
            Err(HandshakeError::UnexpectedStatus(200))
        ));
        assert!(matches!(
            verify_response("AAAAAAAAAAAAAAAAAAAAAA==", 101, &headers),
            Err(HandshakeError::AcceptMismatch)
        ));
    }

    #[tokio::test]
    async fn reads_response_head_and_keeps_leftover() {
        let io = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x02hi")
            .build();
        let mut buffer = FrameBuffer::new(io);
        let (status, headers) = read_response_head(&mut buffer).await.unwrap();
        assert_eq!(status, 101);
        assert_eq!(headers.get("upgrade"), Some("websocket"));
        assert_eq!(buffer.buffered(), b"\x81\x02hi");
    }
}
