//! WebSocket upgrade and messaging against a real listener.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use h1_wire::config::{RouteKind, WebSocketConfig};
use h1_wire::http::{HandlerError, Reply, Request, RequestBody, Upgrade};
use h1_wire::routing::PathPrefixMatcher;
use h1_wire::ws::handshake::connect;
use h1_wire::{Handler, Message, Router, ServerConfig, WebSocket};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WireMessage;

mod common;

const PRODUCERS: usize = 10;
const PER_PRODUCER: usize = 10;

/// Upgrades and sends `PRODUCERS * PER_PRODUCER` messages from concurrent tasks.
struct Producers;

impl Handler for Producers {
    fn call<'a>(
        &'a self,
        _request: &'a Request,
        _body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>> {
        Box::pin(async { Ok(Reply::Upgrade(Upgrade::websocket(produce))) })
    }
}

async fn produce(socket: WebSocket) {
    let mut tasks = Vec::new();
    for p in 0..PRODUCERS {
        let sender = socket.sender();
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                sender.send_text(format!("{p}:{i}")).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn tungstenite_client_round_trip() {
    let server = common::start_server(common::echo_config()).await;
    let (mut ws, response) = tokio_tungstenite::connect_async(server.ws_url("/ws"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    ws.send(WireMessage::text("hello")).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), WireMessage::text("hello"));

    let payload = vec![7u8; 70_000];
    ws.send(WireMessage::binary(payload.clone())).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), WireMessage::binary(payload));

    ws.send(WireMessage::Ping(vec![1, 2, 3].into())).await.unwrap();
    assert_eq!(
        ws.next().await.unwrap().unwrap(),
        WireMessage::Pong(vec![1, 2, 3].into())
    );

    // The server answers the close and ends the stream.
    ws.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(message)) = ws.next().await {
            assert!(message.is_close(), "unexpected {message:?}");
        }
    })
    .await
    .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn concurrent_producers_deliver_every_message_once() {
    let router = Router::new().route("producers", PathPrefixMatcher::new("/"), Producers);
    let server = common::start_with_handler(ServerConfig::default(), router).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/"))
        .await
        .unwrap();

    let mut next_index: HashMap<usize, usize> = HashMap::new();
    let mut total = 0;
    while let Some(message) = ws.next().await {
        match message.unwrap() {
            WireMessage::Text(text) => {
                let (p, i) = text.split_once(':').unwrap();
                let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
                let expected = next_index.entry(p).or_insert(0);
                assert_eq!(i, *expected, "producer {p} out of order");
                *expected += 1;
                total += 1;
            }
            WireMessage::Close(frame) => {
                assert_eq!(frame.map(|f| u16::from(f.code)), Some(1000));
                break;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert_eq!(total, PRODUCERS * PER_PRODUCER);
    assert_eq!(next_index.len(), PRODUCERS);

    server.stop().await;
}

#[tokio::test]
async fn client_role_connects_to_server() {
    let server = common::start_server(common::echo_config()).await;

    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut ws = connect(stream, &server.addr.to_string(), "/ws", &WebSocketConfig::default())
        .await
        .unwrap();

    ws.send_text("over the wire").await.unwrap();
    ws.send_binary(vec![0u8, 255]).await.unwrap();
    assert_eq!(ws.recv().await, Some(Message::Text("over the wire".into())));
    assert_eq!(ws.recv().await, Some(Message::Binary(vec![0u8, 255].into())));

    // Dropping the sending side closes the session from the client.
    let (sender, mut receiver) = ws.split();
    drop(sender);
    let end = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .unwrap();
    assert!(end.is_none());

    server.stop().await;
}

#[tokio::test]
async fn plain_request_to_websocket_route_gets_426() {
    let server = common::start_server(common::echo_config()).await;

    let res = common::client().get(server.url("/ws")).send().await.unwrap();
    assert_eq!(res.status(), 426);
    assert_eq!(res.headers()["upgrade"], "websocket");

    server.stop().await;
}

#[tokio::test]
async fn upgrade_without_key_gets_400() {
    let mut config = ServerConfig::default();
    config.routes = vec![common::route("ws", None, RouteKind::WebsocketEcho, None)];
    let server = common::start_server(config).await;

    let out = common::raw_exchange(
        server.addr,
        b"GET / HTTP/1.1\r\nHost: t\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
          Sec-WebSocket-Version: 13\r\n\r\n",
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{out}");
    assert!(!out.contains("Sec-WebSocket-Accept"));

    server.stop().await;
}
