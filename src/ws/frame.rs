//! WebSocket frame model and codec.
//!
//! # Frame Format
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |    Masking-key (if MASK set)  |         Payload Data          |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! # Design Decisions
//! - The decoder never consumes a partial frame; it waits until the whole
//!   frame is buffered and then takes it in one step
//! - Fragmented data messages are rejected, so every data frame is a message
//! - Masking is decided by [`Role`] alone

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ws::error::WsError;

/// Largest payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Which end of the connection this codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects masked frames, sends unmasked ones.
    Server,
    /// Expects unmasked frames, masks everything it sends.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WsError::InvalidOpcode(other)),
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::Continuation => "continuation",
            OpCode::Text => "text",
            OpCode::Binary => "binary",
            OpCode::Close => "close",
            OpCode::Ping => "ping",
            OpCode::Pong => "pong",
        }
    }
}

/// Status codes carried by close frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    Protocol,
    Unsupported,
    InvalidPayload,
    TooBig,
    Internal,
    Other(u16),
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::TooBig => 1009,
            CloseCode::Internal => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1007 => CloseCode::InvalidPayload,
            1009 => CloseCode::TooBig,
            1011 => CloseCode::Internal,
            other => CloseCode::Other(other),
        }
    }
}

/// One WebSocket frame with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    /// Key the frame arrived with, if any. Ignored when encoding.
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, payload)
    }

    /// Close frame with a status code and a reason, truncated to fit the
    /// control payload limit on a character boundary.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(code.into());
        payload.put_slice(&reason.as_bytes()[..end]);
        Self::new(OpCode::Close, payload.freeze())
    }

    /// Close frame with no body.
    pub fn close_empty() -> Self {
        Self::new(OpCode::Close, Bytes::new())
    }

    /// Status code and reason of a close frame. An empty payload yields
    /// `None`. Codes that may not be sent on the wire are rejected.
    pub fn close_reason(&self) -> Result<Option<(CloseCode, String)>, WsError> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(WsError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                if !is_sendable_close_code(code) {
                    return Err(WsError::InvalidClosePayload);
                }
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| WsError::InvalidUtf8)?;
                Ok(Some((CloseCode::from(code), reason.to_string())))
            }
        }
    }
}

/// 1004, 1005, 1006 and 1015 are reserved for local use; 1016..=2999 are
/// unassigned.
fn is_sendable_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
}

/// XOR `payload` with `key`, starting at key offset zero.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Frame codec for one side of a connection.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self { role, max_payload }
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let first = src[0];
        let second = src[1];

        if first & 0x70 != 0 {
            return Err(WsError::ReservedBitsSet);
        }
        let fin = first & 0x80 != 0;
        let opcode = OpCode::from_u8(first & 0x0F)?;
        let masked = second & 0x80 != 0;
        let len7 = second & 0x7F;

        if opcode.is_control() {
            if !fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if usize::from(len7) > MAX_CONTROL_PAYLOAD {
                return Err(WsError::ControlFrameTooLarge(usize::from(len7)));
            }
        } else if !fin || opcode == OpCode::Continuation {
            return Err(WsError::FragmentedMessage);
        }

        match (self.role, masked) {
            (Role::Server, false) => return Err(WsError::UnmaskedClientFrame),
            (Role::Client, true) => return Err(WsError::MaskedServerFrame),
            _ => {}
        }

        let (len, ext) = match len7 {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 2)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(WsError::InvalidLength);
                }
                (len, 8)
            }
            n => (u64::from(n), 0),
        };

        if len > self.max_payload as u64 {
            return Err(WsError::PayloadTooLarge {
                size: len,
                max: self.max_payload,
            });
        }
        // Bounded by max_payload above.
        let len = len as usize;

        let header = 2 + ext + if masked { 4 } else { 0 };
        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }

        src.advance(2 + ext);
        let mask = if masked {
            let mut key = [0u8; 4];
            src.copy_to_slice(&mut key);
            Some(key)
        } else {
            None
        };
        let mut payload = src.split_to(len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            mask,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        let len = frame.payload.len();
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if len > MAX_CONTROL_PAYLOAD {
                return Err(WsError::ControlFrameTooLarge(len));
            }
        }

        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };

        dst.reserve(14 + len);
        let fin_bit = if frame.fin { 0x80 } else { 0 };
        dst.put_u8(fin_bit | frame.opcode as u8);
        if len <= 125 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= usize::from(u16::MAX) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&frame.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&frame.payload),
        }
        Ok(())
    }
}
