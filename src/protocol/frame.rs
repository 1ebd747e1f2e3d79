//! WebSocket frame data model.
//!
//! A [`Frame`] is the smallest unit on the wire. Data frames (text, binary,
//! continuation) compose messages; control frames (close, ping, pong) carry
//! protocol signaling and are never fragmented.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

// ============================================================================
// OpCode
// ============================================================================

/// Frame opcode (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continues a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl OpCode {
    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns `true` for text, binary and continuation.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(Error::protocol(format!("reserved opcode {other:#x}"))),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single WebSocket frame.
///
/// The payload is always stored unmasked; masking is applied by the
/// codec on the way out and removed on the way in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub opcode: OpCode,
    /// Whether this frame completes its message.
    pub fin: bool,
    /// Unmasked application or control payload.
    pub payload: Bytes,
}

// ============================================================================
// Frame - Constructors
// ============================================================================

impl Frame {
    /// Creates a frame with explicit opcode and `fin` flag.
    #[inline]
    #[must_use]
    pub fn new(opcode: OpCode, fin: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            fin,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text, true, Bytes::from(text.into()))
    }

    /// Creates a final binary frame.
    #[inline]
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, true, data)
    }

    /// Creates a continuation frame.
    #[inline]
    #[must_use]
    pub fn continuation(fin: bool, data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Continuation, fin, data)
    }

    /// Creates a ping frame.
    #[inline]
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, true, data)
    }

    /// Creates a pong frame.
    #[inline]
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, true, data)
    }

    /// Creates a close frame from a pre-encoded close payload.
    #[inline]
    #[must_use]
    pub fn close(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Close, true, payload)
    }
}

// ============================================================================
// Frame - Accessors
// ============================================================================

impl Frame {
    /// Returns `true` if this frame completes a message.
    #[inline]
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.fin
    }

    /// Returns `true` if this is a control frame.
    #[inline]
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
