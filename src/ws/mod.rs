//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → handshake.rs (validate, compute accept, 101 response)
//!     → messenger.rs (read task + write task own the transport)
//!         → frame.rs (FrameCodec on both halves)
//! ```
//!
//! # Design Decisions
//! - No extensions and no fragmented messages
//! - After the handshake the HTTP layer never touches the transport again

pub mod error;
pub mod frame;
pub mod handshake;
pub mod messenger;

pub use error::WsError;
pub use frame::{CloseCode, Frame, FrameCodec, OpCode, Role};
pub use handshake::HandshakeError;
pub use messenger::{Message, Termination, WebSocket, WsReceiver, WsSender};
