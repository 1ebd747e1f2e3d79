//! Close status codes and close payloads.
//!
//! See RFC 6455 §7.4 for the code registry.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::frame::MAX_CONTROL_PAYLOAD;

// ============================================================================
// Constants
// ============================================================================

/// Longest reason that fits a close frame next to the 2-byte code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

// ============================================================================
// CloseCode
// ============================================================================

/// Close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum CloseCode {
    /// 1000: purpose fulfilled.
    Normal,
    /// 1001: endpoint going away.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: data type cannot be accepted.
    UnhandledType,
    /// 1005: no status code was present. Never sent on the wire.
    NoStatusReceived,
    /// 1006: connection dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007: payload inconsistent with message type (non-UTF-8 text).
    InvalidPayload,
    /// 1008: policy violated.
    PolicyViolated,
    /// 1009: message too big to process.
    MessageTooBig,
    /// 1010: client expected an extension the server did not negotiate.
    MandatoryExtension,
    /// 1011: unexpected server condition.
    InternalError,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnhandledType => 1003,
            Self::NoStatusReceived => 1005,
            Self::Abnormal => 1006,
            Self::InvalidPayload => 1007,
            Self::PolicyViolated => 1008,
            Self::MessageTooBig => 1009,
            Self::MandatoryExtension => 1010,
            Self::InternalError => 1011,
            Self::Other(code) => code,
        }
    }

    /// Returns `true` if the code may legally appear in a close frame.
    #[must_use]
    pub const fn is_valid_on_wire(self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Returns `true` if an application may close with this code.
    #[must_use]
    pub const fn is_allowed_for_application(self) -> bool {
        matches!(self.as_u16(), 1000 | 3000..=4999)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnhandledType,
            1005 => Self::NoStatusReceived,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolated,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

// ============================================================================
// CloseInfo
// ============================================================================

/// Outcome of a closed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Status code reported by the peer, or a local-only code.
    pub code: CloseCode,
    /// Human-readable reason; may be empty.
    pub reason: String,
    /// `true` if both sides exchanged close frames.
    pub was_clean: bool,
}

impl CloseInfo {
    /// Creates close info for a negotiated close.
    #[inline]
    #[must_use]
    pub fn clean(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
        }
    }

    /// Creates close info for a close without a close frame exchange.
    #[inline]
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            code: CloseCode::Abnormal,
            reason: String::new(),
            was_clean: false,
        }
    }

    /// Parses the payload of a close frame received from the peer.
    ///
    /// An empty payload yields [`CloseCode::NoStatusReceived`].
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] (1002) for a 1-byte payload or an illegal code
    /// - [`Error::Protocol`] (1007) for a non-UTF-8 reason
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        match payload {
            [] => Ok(Self::clean(CloseCode::NoStatusReceived, "")),
            [_] => Err(Error::protocol("close payload of 1 byte")),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from(u16::from_be_bytes([*hi, *lo]));
                if !code.is_valid_on_wire() {
                    return Err(Error::protocol(format!("illegal close code {code}")));
                }
                let reason = std::str::from_utf8(reason)
                    .map_err(|_| Error::invalid_utf8("close reason is not valid UTF-8"))?;
                Ok(Self::clean(code, reason))
            }
        }
    }
}

/// Encodes a close frame payload.
///
/// Local-only codes (1005, 1006) produce an empty payload.
#[must_use]
pub fn close_payload(code: CloseCode, reason: &str) -> Bytes {
    if matches!(code, CloseCode::NoStatusReceived | CloseCode::Abnormal) {
        return Bytes::new();
    }

    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code.as_u16());
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

// ============================================================================
// Tests
// ============================================================================
