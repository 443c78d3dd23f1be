//! Application-facing request handling surface.
//!
//! # Responsibilities
//! - Define the [`Handler`] trait the connection loop dispatches to
//! - Give handlers pull-based access to the request body ([`RequestBody`])
//! - Let a handler take over the connection through an [`Upgrade`]
//!
//! # Design Decisions
//! - The body borrows the connection's buffer, so a handler can never read
//!   past its own request
//! - `100 Continue` is sent lazily, only when the handler starts reading
//! - A failed body read poisons the connection; it is closed after the reply

use std::future::Future;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::http::body::{BodyKind, BodyReader};
use crate::http::buffer::FrameBuffer;
use crate::http::connection::BoxedIo;
use crate::http::error::{HandlerError, HttpError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::ws::WebSocket;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Handles one request and produces a [`Reply`].
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        request: &'a Request,
        body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(
        &'a self,
        request: &'a Request,
        body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>> {
        (**self).call(request, body)
    }
}

/// Outcome of a handler.
pub enum Reply {
    Response(Response),
    Upgrade(Upgrade),
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

/// Request to switch the connection to another protocol.
pub enum Upgrade {
    /// Complete the WebSocket handshake and run `session` on the socket.
    WebSocket(Box<dyn FnOnce(WebSocket) -> BoxFuture<'static, ()> + Send>),
}

impl Upgrade {
    /// Upgrade to WebSocket. `session` runs on the connection's task and the
    /// connection ends when it returns.
    pub fn websocket<F, Fut>(session: F) -> Self
    where
        F: FnOnce(WebSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Upgrade::WebSocket(Box::new(move |socket| Box::pin(session(socket))))
    }
}

impl std::fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Upgrade::WebSocket(_) => f.write_str("Upgrade::WebSocket"),
        }
    }
}

/// Per-request body bookkeeping owned by the connection loop.
#[derive(Debug)]
pub(crate) struct BodyState {
    pub reader: BodyReader,
    /// `100 Continue` requested and not yet sent.
    pub continue_pending: bool,
    /// A read failed; the stream position is lost.
    pub poisoned: bool,
    /// Bytes handed out so far.
    pub read: u64,
    pub limit: Option<u64>,
}

impl BodyState {
    pub fn new(reader: BodyReader, expects_continue: bool, limit: Option<u64>) -> Self {
        let continue_pending = expects_continue && !reader.is_done();
        Self {
            reader,
            continue_pending,
            poisoned: false,
            read: 0,
            limit,
        }
    }
}

/// The body of the request being handled.
pub struct RequestBody<'a, R = BoxedIo> {
    state: &'a mut BodyState,
    buffer: &'a mut FrameBuffer<R>,
}

impl<'a, R> RequestBody<'a, R>
where
    R: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(state: &'a mut BodyState, buffer: &'a mut FrameBuffer<R>) -> Self {
        Self { state, buffer }
    }

    pub fn kind(&self) -> BodyKind {
        self.state.reader.kind()
    }

    /// Declared length, if the body is length-delimited.
    pub fn content_length(&self) -> Option<u64> {
        match self.kind() {
            BodyKind::Chunked => None,
            _ => self.state.reader.remaining_hint().map(|r| r + self.state.read),
        }
    }

    /// Read the next body bytes. `Ok(0)` means the body is complete.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize, HttpError> {
        if self.state.poisoned {
            return Err(HttpError::UnexpectedEof);
        }
        let result = self.read_inner(out).await;
        if result.is_err() {
            self.state.poisoned = true;
        }
        result
    }

    async fn read_inner(&mut self, out: &mut [u8]) -> Result<usize, HttpError> {
        if self.state.continue_pending {
            self.state.continue_pending = false;
            let io = self.buffer.get_mut();
            io.write_all(CONTINUE).await?;
            io.flush().await?;
        }
        let n = self.state.reader.read(self.buffer, out).await?;
        self.state.read += n as u64;
        if let Some(limit) = self.state.limit {
            if self.state.read > limit {
                return Err(HttpError::PayloadTooLarge {
                    length: self.state.read,
                    limit,
                });
            }
        }
        Ok(n)
    }

    /// Read the whole body, failing once more than `limit` bytes arrive.
    pub async fn read_to_end(&mut self, limit: usize) -> Result<BytesMut, HttpError> {
        let mut out = BytesMut::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            if out.len() + n > limit {
                self.state.poisoned = true;
                return Err(HttpError::PayloadTooLarge {
                    length: (out.len() + n) as u64,
                    limit: limit as u64,
                });
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn continue_is_sent_on_first_read_only() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let mut buffer = FrameBuffer::new(server);
        let mut state = BodyState::new(BodyReader::bounded(5), true, None);

        let reader = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut got = vec![0u8; CONTINUE.len()];
            client_read.read_exact(&mut got).await.unwrap();
            client_write.write_all(b"hello").await.unwrap();
            got
        });

        let mut body = RequestBody::new(&mut state, &mut buffer);
        let bytes = body.read_to_end(64).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(reader.await.unwrap(), CONTINUE);
        assert!(!state.continue_pending);
        assert!(!state.poisoned);
    }

    #[tokio::test]
    async fn chunked_body_over_limit_poisons() {
        let io = tokio_test::io::Builder::new()
            .read(b"8\r\n12345678\r\n0\r\n\r\n")
            .build();
        let mut buffer = FrameBuffer::new(io);
        let mut state = BodyState::new(BodyReader::chunked(), false, Some(4));

        let mut body = RequestBody::new(&mut state, &mut buffer);
        let err = body.read_to_end(1024).await.unwrap_err();
        assert!(matches!(err, HttpError::PayloadTooLarge { limit: 4, .. }));
        assert!(state.poisoned);
    }

    #[tokio::test]
    async fn empty_body_never_sends_continue() {
        let io = tokio_test::io::Builder::new().build();
        let mut buffer = FrameBuffer::new(io);
        let mut state = BodyState::new(BodyReader::empty(), true, None);
        assert!(!state.continue_pending);

        let mut body = RequestBody::new(&mut state, &mut buffer);
        assert_eq!(body.content_length(), Some(0));
        assert!(body.read_to_end(16).await.unwrap().is_empty());
    }
}
