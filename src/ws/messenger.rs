//! Concurrent message exchange over an upgraded connection.
//!
//! # Data Flow
//! ```text
//! transport read half → read task (sole decoder) ──text/binary──▶ WsReceiver
//!                                  │
//!                                  └──pong / close ack──▶ control channel ─┐
//!                                                                          ▼
//! WsSender (cloned by producers) ──messages──▶ outbound channel ──▶ write task (sole writer)
//!                                                                          │
//!                                                     transport write half ◀┘
//! ```
//!
//! # Design Decisions
//! - Exactly one task decodes and exactly one task encodes, so frames are
//!   never interleaved on the wire
//! - Control frames jump the outbound queue (`biased` select)
//! - Dropping every [`WsSender`] is the application's close signal

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{stream, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite};

use crate::config::WebSocketConfig;
use crate::observability::metrics;
use crate::ws::error::WsError;
use crate::ws::frame::{CloseCode, Frame, FrameCodec, OpCode, Role};

/// How long the read side waits for the peer's close reply once we closed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pending pong/close requests from the read task.
const CONTROL_CAPACITY: usize = 16;

/// An application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
        }
    }
}

struct Outbound {
    frame: Frame,
    /// Signalled when the writer takes the frame (synchronous hand-off).
    taken: Option<oneshot::Sender<()>>,
}

enum Control {
    Pong(Bytes),
    /// Send this close frame, then stop writing.
    Close(Frame),
    /// Stop writing without a close frame.
    Stop,
}

/// Cloneable sending half. Producers may send concurrently.
#[derive(Clone)]
pub struct WsSender {
    tx: mpsc::Sender<Outbound>,
    synchronous: bool,
}

impl WsSender {
    /// Queue `message`. With an outbound capacity of zero this resolves only
    /// after the writer has taken the message.
    pub async fn send(&self, message: Message) -> Result<(), WsError> {
        let frame = message.into_frame();
        if !self.synchronous {
            return self
                .tx
                .send(Outbound { frame, taken: None })
                .await
                .map_err(|_| WsError::Closed);
        }
        let (taken_tx, taken_rx) = oneshot::channel();
        self.tx
            .send(Outbound {
                frame,
                taken: Some(taken_tx),
            })
            .await
            .map_err(|_| WsError::Closed)?;
        taken_rx.await.map_err(|_| WsError::Closed)
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), WsError> {
        self.send(Message::Text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), WsError> {
        self.send(Message::Binary(data.into())).await
    }

    /// True once the write task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half. Yields text and binary messages in arrival order.
pub struct WsReceiver {
    rx: mpsc::Receiver<Message>,
}

impl WsReceiver {
    /// Next message, or `None` once the peer closed or the session failed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Resolves once both session tasks have finished.
#[derive(Clone)]
pub struct Termination(watch::Receiver<()>);

impl Termination {
    pub async fn wait(mut self) {
        // Nobody sends; the channel closes when both tasks drop their handle.
        while self.0.changed().await.is_ok() {}
    }
}

/// A running WebSocket session.
pub struct WebSocket {
    sender: WsSender,
    receiver: WsReceiver,
    termination: Termination,
}

impl WebSocket {
    /// Take ownership of `io` and start the read and write tasks.
    ///
    /// `leftover` holds bytes that arrived behind the handshake; they are
    /// decoded before anything is read from `io`.
    pub fn spawn<S>(io: S, leftover: BytesMut, role: Role, config: &WebSocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let mut codec = FrameCodec::new(role, config.max_message_bytes);

        // Complete frames already buffered. A partial one stays in `leftover`.
        let mut buffered = Vec::new();
        let mut leftover = leftover;
        loop {
            match codec.decode(&mut leftover) {
                Ok(Some(frame)) => buffered.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => {
                    buffered.push(Err(e));
                    break;
                }
            }
        }
        let mut frames = FramedRead::new(read_half, codec.clone());
        frames.read_buffer_mut().extend_from_slice(&leftover);
        let frames = stream::iter(buffered).chain(frames);

        let sink = FramedWrite::new(write_half, codec);

        let synchronous = config.outbound_capacity == 0;
        let (out_tx, out_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (closing_tx, closing_rx) = watch::channel(false);
        let (alive_tx, alive_rx) = watch::channel(());
        let alive = Arc::new(alive_tx);

        let reader_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            read_loop(frames, in_tx, control_tx, closing_rx).await;
            drop(reader_alive);
        });
        tokio::spawn(async move {
            write_loop(sink, out_rx, control_rx, closing_tx).await;
            drop(alive);
        });

        tracing::debug!(?role, "WebSocket session started");

        Self {
            sender: WsSender {
                tx: out_tx,
                synchronous,
            },
            receiver: WsReceiver { rx: in_rx },
            termination: Termination(alive_rx),
        }
    }

    /// Another handle for producers.
    pub fn sender(&self) -> WsSender {
        self.sender.clone()
    }

    pub async fn send(&self, message: Message) -> Result<(), WsError> {
        self.sender.send(message).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), WsError> {
        self.sender.send_text(text).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), WsError> {
        self.sender.send_binary(data).await
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn termination(&self) -> Termination {
        self.termination.clone()
    }

    pub fn split(self) -> (WsSender, WsReceiver) {
        (self.sender, self.receiver)
    }

    /// Give up this handle and wait for the session to end. Other
    /// [`WsSender`] clones keep the session open until they are dropped.
    pub async fn join(self) {
        let WebSocket {
            sender,
            receiver,
            termination,
        } = self;
        drop(sender);
        drop(receiver);
        termination.wait().await;
    }
}

async fn read_loop<St>(
    frames: St,
    inbound: mpsc::Sender<Message>,
    control: mpsc::Sender<Control>,
    mut closing: watch::Receiver<bool>,
) where
    St: futures_util::Stream<Item = Result<Frame, WsError>> + Unpin,
{
    let mut frames = frames;
    let close_timer = tokio::time::sleep(Duration::MAX);
    tokio::pin!(close_timer);
    let mut watching_close = true;

    loop {
        let item = tokio::select! {
            item = frames.next() => item,
            _ = closing.changed(), if watching_close => {
                watching_close = false;
                close_timer.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                continue;
            }
            () = &mut close_timer => {
                tracing::debug!("Peer did not answer close in time");
                break;
            }
        };

        let frame = match item {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket read failed");
                let _ = control
                    .send(Control::Close(Frame::close(e.close_code(), "")))
                    .await;
                break;
            }
            None => {
                let _ = control.send(Control::Stop).await;
                break;
            }
        };
        metrics::record_ws_frame("in", frame.opcode.as_str());

        match frame.opcode {
            OpCode::Text => match String::from_utf8(frame.payload.to_vec()) {
                Ok(text) => {
                    let _ = inbound.send(Message::Text(text)).await;
                }
                Err(_) => {
                    let code = WsError::InvalidUtf8.close_code();
                    let _ = control.send(Control::Close(Frame::close(code, ""))).await;
                    break;
                }
            },
            OpCode::Binary => {
                let _ = inbound.send(Message::Binary(frame.payload)).await;
            }
            OpCode::Ping => {
                let _ = control.send(Control::Pong(frame.payload)).await;
            }
            OpCode::Pong => {}
            OpCode::Close => {
                let reply = match frame.close_reason() {
                    Ok(Some((code, reason))) => {
                        tracing::debug!(code = u16::from(code), %reason, "Peer closed");
                        Frame::close(code, "")
                    }
                    Ok(None) => Frame::close_empty(),
                    Err(e) => Frame::close(e.close_code(), ""),
                };
                let _ = control.send(Control::Close(reply)).await;
                break;
            }
            OpCode::Continuation => {
                let code = WsError::FragmentedMessage.close_code();
                let _ = control.send(Control::Close(Frame::close(code, ""))).await;
                break;
            }
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::Receiver<Outbound>,
    mut control: mpsc::Receiver<Control>,
    closing: watch::Sender<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            ctrl = control.recv() => match ctrl {
                Some(Control::Pong(payload)) => Some(Frame::pong(payload)),
                Some(Control::Close(frame)) => {
                    let _ = send_frame(&mut sink, frame).await;
                    break;
                }
                Some(Control::Stop) | None => break,
            },
            out = outbound.recv() => match out {
                Some(Outbound { frame, taken }) => {
                    if let Some(taken) = taken {
                        let _ = taken.send(());
                    }
                    Some(frame)
                }
                None => {
                    let _ = send_frame(&mut sink, Frame::close(CloseCode::Normal, "")).await;
                    break;
                }
            },
        };
        if let Some(frame) = next {
            if let Err(e) = send_frame(&mut sink, frame).await {
                tracing::debug!(error = %e, "WebSocket write failed");
                break;
            }
        }
    }

    let _ = closing.send(true);
    if let Err(e) = sink.close().await {
        tracing::trace!(error = %e, "Closing write half failed");
    }
}

async fn send_frame<W>(sink: &mut FramedWrite<W, FrameCodec>, frame: Frame) -> Result<(), WsError>
where
    W: AsyncWrite + Unpin,
{
    let opcode = frame.opcode;
    sink.send(frame).await?;
    metrics::record_ws_frame("out", opcode.as_str());
    Ok(())
}
