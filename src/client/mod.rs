//! Public WebSocket client.
//!
//! # Lifecycle
//!
//! 1. `WebSocket::new` / `WebSocket::builder()` - configure, state CONNECTING
//! 2. `set_delegate` - register the event receiver (weakly held)
//! 3. `open` - connect, handshake, then OPEN
//! 4. `send` / `send_ping` - queue frames while OPEN
//! 5. `close` - CLOSING, then CLOSED once the peer answers or times out
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent configuration |
//! | `options` | Limits and timeouts |
//! | `socket` | The `WebSocket` handle |
//! | `state` | `ReadyState` |

// ============================================================================
// Submodules
// ============================================================================

/// Builder for WebSocket configuration.
pub mod builder;

/// Connection limits and timeouts.
pub mod options;

/// The WebSocket handle.
pub mod socket;

/// Ready state tracking.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::WebSocketBuilder;
pub use options::WebSocketOptions;
pub use socket::WebSocket;
pub use state::ReadyState;

pub(crate) use state::SharedState;
