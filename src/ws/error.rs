//! WebSocket protocol errors.

use std::io;

use crate::ws::frame::CloseCode;

/// Errors raised by the frame codec and the messenger.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("reserved bits set")]
    ReservedBitsSet,

    #[error("unknown opcode {0:#x}")]
    InvalidOpcode(u8),

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(usize),

    #[error("fragmented control frame")]
    FragmentedControlFrame,

    #[error("fragmented messages are not supported")]
    FragmentedMessage,

    #[error("client frame is not masked")]
    UnmaskedClientFrame,

    #[error("server frame is masked")]
    MaskedServerFrame,

    #[error("payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge { size: u64, max: usize },

    #[error("64-bit payload length has the most significant bit set")]
    InvalidLength,

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed close payload")]
    InvalidClosePayload,

    #[error("connection closed")]
    Closed,
}

impl WsError {
    /// Close code sent to the peer when this error ends the session.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WsError::Io(_) | WsError::Closed => CloseCode::Internal,
            WsError::InvalidUtf8 => CloseCode::InvalidPayload,
            WsError::PayloadTooLarge { .. } => CloseCode::TooBig,
            _ => CloseCode::Protocol,
        }
    }
}
