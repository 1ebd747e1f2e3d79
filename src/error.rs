//! Error types for the WebSocket client and tunnel proxy.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_tunnel::{Result, WebSocket};
//!
//! fn example(socket: &WebSocket) -> Result<()> {
//!     socket.send("hello")?;
//!     socket.send_ping(b"")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`], [`Error::Json`] |
//! | Transport | [`Error::Transport`], [`Error::Io`], [`Error::Tls`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Handshake | [`Error::Handshake`], [`Error::HandshakeStatus`], [`Error::AcceptMismatch`] |
//! | Protocol | [`Error::Protocol`] |
//! | Misuse | [`Error::InvalidState`], [`Error::AlreadyOpened`], [`Error::InvalidArgument`] |
//! | Local relay | [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::client::ReadyState;
use crate::protocol::CloseCode;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a builder or options value is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Socket-level failure.
    ///
    /// Returned when the transport is reset or unusable.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// TLS session could not be established.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    /// Connection attempt exceeded its deadline.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection is gone.
    ///
    /// Returned when a command reaches a connection whose event loop exited.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Malformed or incomplete upgrade response.
    #[error("Handshake error: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// Server answered the upgrade with a status other than 101.
    #[error("Handshake rejected with HTTP status {status}")]
    HandshakeStatus {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// `Sec-WebSocket-Accept` did not match the key sent.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptMismatch {
        /// Accept value derived from our key.
        expected: String,
        /// Accept value the server sent.
        actual: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Peer violated the framing protocol.
    ///
    /// The connection is closed with `code`.
    #[error("Protocol error ({code}): {message}")]
    Protocol {
        /// Close code sent to the peer.
        code: CloseCode,
        /// Description of the violation.
        message: String,
    },

    // ========================================================================
    // Misuse Errors
    // ========================================================================
    /// Operation is not valid in the current ready state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the connection was in.
        state: ReadyState,
    },

    /// `open` was called more than once.
    #[error("WebSocket already opened; open must be called exactly once")]
    AlreadyOpened,

    /// Argument rejected before any I/O.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local relay WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a handshake status error.
    #[inline]
    pub fn handshake_status(status: u16) -> Self {
        Self::HandshakeStatus { status }
    }

    /// Creates an accept key mismatch error.
    #[inline]
    pub fn accept_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::AcceptMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a protocol error closing with 1002.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::protocol_with(CloseCode::ProtocolError, message)
    }

    /// Creates a protocol error closing with `code`.
    #[inline]
    pub fn protocol_with(code: CloseCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Creates a protocol error for a non-UTF-8 text payload (1007).
    #[inline]
    pub fn invalid_utf8(message: impl Into<String>) -> Self {
        Self::protocol_with(CloseCode::InvalidPayload, message)
    }

    /// Creates a protocol error for an oversized message (1009).
    #[inline]
    pub fn message_too_big(size: u64, max: usize) -> Self {
        Self::protocol_with(
            CloseCode::MessageTooBig,
            format!("message of {size} bytes exceeds maximum of {max}"),
        )
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(operation: &'static str, state: ReadyState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport-level failure.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Tls { .. }
                | Self::Io(_)
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
        )
    }

    /// Returns `true` if the upgrade handshake failed.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::Handshake { .. } | Self::HandshakeStatus { .. } | Self::AcceptMismatch { .. }
        )
    }

    /// Returns `true` if the peer violated the protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns `true` if the error ends the connection.
    ///
    /// Fatal errors surface through the delegate; everything else is
    /// returned to the caller.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_transport_error() || self.is_handshake_error() || self.is_protocol_error()
    }

    /// Returns `true` if the caller used the API incorrectly.
    ///
    /// Misuse errors are reported synchronously and leave the
    /// connection state untouched.
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::AlreadyOpened | Self::InvalidArgument { .. }
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns the close code a protocol error maps to.
    #[inline]
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::transport("connection reset");
        assert_eq!(err.to_string(), "Transport error: connection reset");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("send", ReadyState::Connecting);
        assert_eq!(err.to_string(), "Cannot send while CONNECTING");
    }

    #[test]
    fn test_protocol_close_codes() {
        assert_eq!(
            Error::protocol("reserved bits").close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::invalid_utf8("bad text").close_code(),
            Some(CloseCode::InvalidPayload)
        );
        assert_eq!(
            Error::message_too_big(1 << 30, 1024).close_code(),
            Some(CloseCode::MessageTooBig)
        );
        assert_eq!(Error::transport("x").close_code(), None);
    }

    #[test]
    fn test_categories_are_disjoint() {
        let transport = Error::transport("reset");
        let handshake = Error::handshake_status(404);
        let protocol = Error::protocol("bad frame");
        let misuse = Error::AlreadyOpened;

        assert!(transport.is_transport_error());
        assert!(!transport.is_handshake_error());

        assert!(handshake.is_handshake_error());
        assert!(!handshake.is_protocol_error());

        assert!(protocol.is_protocol_error());
        assert!(!protocol.is_misuse());

        assert!(misuse.is_misuse());
        assert!(!misuse.is_transport_error());
        assert!(!misuse.is_fatal());
        assert!(transport.is_fatal() && handshake.is_fatal() && protocol.is_fatal());
    }

    #[test]
    fn test_accept_mismatch_is_handshake_error() {
        let err = Error::accept_mismatch("abc=", "abd=");
        assert!(err.is_handshake_error());
        assert!(err.to_string().contains("abc="));
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connection_timeout(5000).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset by peer");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transport_error());
    }

    #[test]
    fn test_from_url_error() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }
}
