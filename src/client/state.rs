//! Ready state and the state shared between a handle and its event loop.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

// ============================================================================
// ReadyState
// ============================================================================

/// Connection lifecycle state.
///
/// Transitions only move forward:
/// `CONNECTING → OPEN → CLOSING → CLOSED`, possibly skipping steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Transport or handshake in progress.
    Connecting = 0,
    /// Handshake complete; messages may flow.
    Open = 1,
    /// A close frame has been sent or received.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl ReadyState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SharedState
// ============================================================================

/// State read by [`WebSocket`](crate::WebSocket) handles and written by
/// the connection's event loop.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    ready_state: AtomicU8,
    protocol: OnceLock<String>,
}

impl SharedState {
    pub(crate) fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::Acquire))
    }

    /// Moves to `to` if it is ahead of the current state.
    ///
    /// Returns `false` when the state is already at or past `to`.
    pub(crate) fn advance(&self, to: ReadyState) -> bool {
        self.ready_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (to as u8 > current).then_some(to as u8)
            })
            .is_ok()
    }

    /// Moves from `from` to `to` only if the state is still `from`.
    pub(crate) fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.ready_state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_protocol(&self, protocol: String) {
        let _ = self.protocol.set(protocol);
    }

    pub(crate) fn protocol(&self) -> Option<&str> {
        self.protocol.get().map(String::as_str)
    }
}

// ============================================================================
// Tests
// ============================================================================
