//! Per-connection request/response cycle.
//!
//! # Data Flow
//! ```text
//! ParsingHeader ──▶ HandlingRequest ──▶ WritingResponse ──▶ DrainingBody ──▶ ParsingHeader
//!       │                  │                   │                   │
//!       │ framing error    │ upgrade           │ close             │ error
//!       ▼                  ▼                   ▼                   ▼
//! SendErrorAndClose     Upgraded            Closed              Closed
//! ```
//!
//! # Design Decisions
//! - One task per connection; requests are handled strictly in order
//! - The transport is never split during the HTTP phase
//! - Unread request bodies are drained so the next request starts on a
//!   message boundary

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::config::{ServerConfig, WebSocketConfig};
use crate::http::body::BodyReader;
use crate::http::buffer::FrameBuffer;
use crate::http::error::{ErrorClass, HandlerError, HttpError};
use crate::http::handler::{BodyState, Handler, Reply, RequestBody, Upgrade};
use crate::http::request::{parse_request, Method, ParseLimits, Request, Version};
use crate::http::response::{ConnectionHeader, Response, ResponseBody, ResponseWriter, WriteOptions};
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::ws::{handshake, Role, WebSocket};

/// A bidirectional byte-stream transport.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// Type-erased transport owned by a connection.
pub type BoxedIo = Box<dyn Io>;

/// Connection-level settings derived from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub limits: ParseLimits,
    pub read_buffer_size: usize,
    /// Idle time allowed while waiting for a request.
    pub keep_alive: Option<Duration>,
    pub websocket: WebSocketConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            limits: config.limits.parse_limits(),
            read_buffer_size: config.limits.read_buffer_size,
            keep_alive: config.timeouts.keep_alive(),
            websocket: config.websocket.clone(),
        }
    }
}

enum Idle {
    Ready,
    Closed,
    TimedOut,
    Shutdown,
}

enum Next {
    KeepAlive,
    Close,
    Upgrade(Request, Upgrade),
}

/// Drives one connection from accept to close.
pub struct ConnectionLoop<H> {
    id: ConnectionId,
    handler: Arc<H>,
    settings: Arc<ConnectionSettings>,
    buffer: FrameBuffer<BoxedIo>,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<H: Handler> ConnectionLoop<H> {
    pub fn new<T>(io: T, id: ConnectionId, handler: Arc<H>, settings: Arc<ConnectionSettings>) -> Self
    where
        T: Io + 'static,
    {
        let buffer = FrameBuffer::with_read_size(Box::new(io) as BoxedIo, settings.read_buffer_size);
        Self {
            id,
            handler,
            settings,
            buffer,
            shutdown: None,
        }
    }

    /// Close the connection between requests once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Serve requests until the connection closes or is upgraded.
    pub async fn run(mut self) {
        loop {
            match self.wait_for_request().await {
                Idle::Ready => {}
                Idle::Closed => break,
                Idle::TimedOut => {
                    tracing::debug!(connection_id = %self.id, "Keep-alive timeout");
                    break;
                }
                Idle::Shutdown => {
                    tracing::debug!(connection_id = %self.id, "Closing idle connection for shutdown");
                    break;
                }
            }

            let (request, body) = match parse_request(&mut self.buffer, &self.settings.limits).await {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(e) => {
                    self.reject(e).await;
                    break;
                }
            };

            match self.handle(request, body).await {
                Next::KeepAlive => continue,
                Next::Close => break,
                Next::Upgrade(request, upgrade) => return self.upgrade(request, upgrade).await,
            }
        }

        if let Err(e) = self.buffer.get_mut().shutdown().await {
            tracing::trace!(connection_id = %self.id, error = %e, "Transport shutdown failed");
        }
    }

    async fn wait_for_request(&mut self) -> Idle {
        if !self.buffer.is_empty() {
            return Idle::Ready;
        }
        if self.buffer.is_eof() {
            return Idle::Closed;
        }

        let id = self.id;
        let keep_alive = self.settings.keep_alive;
        let buffer = &mut self.buffer;
        let shutdown_rx = self.shutdown.as_mut();
        let fill = async {
            match keep_alive {
                Some(limit) => tokio::time::timeout(limit, buffer.fill()).await.ok(),
                None => Some(buffer.fill().await),
            }
        };
        let shutdown = async {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            filled = fill => match filled {
                Some(Ok(0)) => Idle::Closed,
                Some(Ok(_)) => Idle::Ready,
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %id, error = %e, "Read failed");
                    Idle::Closed
                }
                None => Idle::TimedOut,
            },
            () = shutdown => Idle::Shutdown,
        }
    }

    /// Best-effort error response for a request that could not be parsed.
    async fn reject(&mut self, error: HttpError) {
        metrics::record_parse_error(error.kind());
        if let HttpError::Io(e) = &error {
            tracing::debug!(connection_id = %self.id, error = %e, "Transport failed while reading request");
            return;
        }
        tracing::warn!(
            connection_id = %self.id,
            error = %error,
            status = error.status(),
            "Rejecting malformed request"
        );
        let opts = WriteOptions {
            connection: ConnectionHeader::Close,
            ..WriteOptions::default()
        };
        if let Err(e) = ResponseWriter::new(self.buffer.get_mut())
            .send(Response::error(error.status()), opts)
            .await
        {
            tracing::debug!(connection_id = %self.id, error = %e, "Error response not delivered");
        }
    }

    async fn handle(&mut self, request: Request, body: BodyReader) -> Next {
        let start = Instant::now();

        if request.version.major != 1 {
            self.write(&request, Response::error(505), false, start).await;
            return Next::Close;
        }

        let mut state = BodyState::new(
            body,
            request.expects_continue(),
            self.settings.limits.max_body_bytes,
        );
        let reply = {
            let body = RequestBody::new(&mut state, &mut self.buffer);
            self.handler.call(&request, body).await
        };

        let mut close = state.poisoned;
        let mut response = match reply {
            Ok(Reply::Response(response)) => response,
            Ok(Reply::Upgrade(upgrade)) => return Next::Upgrade(request, upgrade),
            Err(HandlerError::Body(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Request body unreadable");
                close = true;
                Response::error(e.status())
            }
            Err(HandlerError::Application(e)) if state.poisoned => {
                tracing::debug!(connection_id = %self.id, error = %e, "Handler failed after body error");
                Response::error(400)
            }
            Err(HandlerError::Application(e)) => {
                tracing::error!(
                    connection_id = %self.id,
                    method = %request.method,
                    target = %request.target,
                    error = %e,
                    "Handler failed"
                );
                Response::error(500)
            }
        };

        if let Err(e) = response.check_framing() {
            tracing::error!(connection_id = %self.id, error = %e, "Handler produced inconsistent framing");
            response = Response::error(500);
        }

        // A client still waiting for `100 Continue` may never send the body.
        if state.continue_pending {
            close = true;
        }
        // HTTP/1.0 peers cannot decode chunked coding; the body then ends
        // with the connection.
        let unframed = request.version < Version::HTTP_11
            && matches!(response.body, ResponseBody::Chunked(_));
        let persist = !close
            && !unframed
            && !response_closes(&response)
            && request.wants_keep_alive();

        if !self.write(&request, response, persist, start).await || !persist {
            return Next::Close;
        }

        let allowance = state.limit.map(|limit| limit.saturating_sub(state.read));
        match state.reader.drain(&mut self.buffer, allowance).await {
            Ok(0) => Next::KeepAlive,
            Ok(dropped) => {
                tracing::trace!(connection_id = %self.id, dropped, "Drained unread request body");
                Next::KeepAlive
            }
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Request body drain failed");
                Next::Close
            }
        }
    }

    /// Write `response`. Returns false if the connection is no longer usable.
    async fn write(&mut self, request: &Request, response: Response, persist: bool, start: Instant) -> bool {
        let status = response.status;
        let connection = match (persist, request.version < Version::HTTP_11) {
            (false, _) => ConnectionHeader::Close,
            (true, true) => ConnectionHeader::KeepAlive,
            (true, false) => ConnectionHeader::Preserve,
        };
        let opts = WriteOptions {
            head_request: request.method == Method::Head,
            connection,
            chunked_allowed: request.version >= Version::HTTP_11,
        };

        let result = ResponseWriter::new(self.buffer.get_mut()).send(response, opts).await;
        metrics::record_request(request.method.as_str(), status, start);

        match result {
            Ok(bytes) => {
                tracing::debug!(
                    connection_id = %self.id,
                    method = %request.method,
                    target = %request.target,
                    status,
                    bytes,
                    "Request handled"
                );
                true
            }
            Err(e) if e.class() == ErrorClass::Transport => {
                tracing::debug!(connection_id = %self.id, status, error = %e, "Response aborted");
                false
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.id, status, error = %e, "Response failed");
                false
            }
        }
    }

    async fn upgrade(mut self, request: Request, upgrade: Upgrade) {
        let start = Instant::now();
        match upgrade {
            Upgrade::WebSocket(session) => {
                let accept = match handshake::accept(&request) {
                    Ok(accept) => accept,
                    Err(e) => {
                        tracing::warn!(connection_id = %self.id, error = %e, "WebSocket handshake rejected");
                        let response = Response::text(400, format!("{e}\n"));
                        self.write(&request, response, false, start).await;
                        let _ = self.buffer.get_mut().shutdown().await;
                        return;
                    }
                };

                let opts = WriteOptions::default();
                let result = ResponseWriter::new(self.buffer.get_mut())
                    .send(handshake::switching_protocols(&accept), opts)
                    .await;
                metrics::record_request(request.method.as_str(), 101, start);
                if let Err(e) = result {
                    tracing::debug!(connection_id = %self.id, error = %e, "Handshake response not delivered");
                    return;
                }

                tracing::debug!(connection_id = %self.id, target = %request.target, "Upgraded to WebSocket");
                let (io, leftover) = self.buffer.into_parts();
                let socket = WebSocket::spawn(io, leftover, Role::Server, &self.settings.websocket);
                let termination = socket.termination();
                session(socket).await;
                termination.wait().await;
                tracing::debug!(connection_id = %self.id, "WebSocket session ended");
            }
        }
    }
}

/// Responses that announce `Connection: close` end the connection.
fn response_closes(response: &Response) -> bool {
    response.headers.has_token("connection", "close")
}
