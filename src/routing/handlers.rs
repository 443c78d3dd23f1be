//! Built-in endpoints: HTTP echo and WebSocket echo.

use futures_util::future::BoxFuture;

use crate::http::{Handler, HandlerError, Reply, Request, RequestBody, Response, Upgrade};
use crate::ws::WebSocket;

/// Largest body the echo endpoint buffers.
pub const ECHO_BODY_LIMIT: usize = 1024 * 1024;

/// Answers with the request body, or a one-line summary of the request
/// when there is none.
#[derive(Debug, Clone, Default)]
pub struct Echo;

impl Handler for Echo {
    fn call<'a>(
        &'a self,
        request: &'a Request,
        mut body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>> {
        Box::pin(async move {
            let bytes = body.read_to_end(ECHO_BODY_LIMIT).await?;
            let response = if bytes.is_empty() {
                Response::text(200, format!("{} {}\n", request.method, request.target))
            } else {
                let content_type = request
                    .headers
                    .get("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string();
                Response::new(200)
                    .with_header("Content-Type", content_type)
                    .with_bytes(bytes.freeze())
            };
            Ok(response.into())
        })
    }
}

/// Upgrades to WebSocket and sends every message straight back.
#[derive(Debug, Clone, Default)]
pub struct WebSocketEcho;

impl Handler for WebSocketEcho {
    fn call<'a>(
        &'a self,
        request: &'a Request,
        _body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>> {
        Box::pin(async move {
            if !request.is_websocket_upgrade() {
                return Ok(Response::error(426)
                    .with_header("Upgrade", "websocket")
                    .into());
            }
            Ok(Reply::Upgrade(Upgrade::websocket(echo_session)))
        })
    }
}

async fn echo_session(mut socket: WebSocket) {
    let mut echoed = 0u64;
    while let Some(message) = socket.recv().await {
        if socket.send(message).await.is_err() {
            break;
        }
        echoed += 1;
    }
    tracing::debug!(echoed, "WebSocket echo session finished");
}
