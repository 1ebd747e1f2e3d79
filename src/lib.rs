//! ws-tunnel - RFC 6455 WebSocket client and loopback tunnel proxy.
//!
//! This library provides a standalone WebSocket client (frame codec,
//! opening handshake, connection state machine) and a tunnel proxy that
//! exposes a remote WebSocket endpoint on a loopback address for local
//! content to connect to.
//!
//! # Architecture
//!
//! - **Client**: [`WebSocket`] is a cheap handle; a background task owns
//!   the socket and reports events to a [`WebSocketDelegate`]
//! - **Delegate**: held weakly, invoked in order on a [`DelegateQueue`]
//! - **Tunnel**: [`TunnelProxy`] connects a [`WebSocket`] and relays it
//!   through `ws://127.0.0.1:{port}`
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio::sync::Notify;
//! use ws_tunnel::{CloseCode, Message, Result, WebSocket, WebSocketDelegate};
//!
//! struct Printer {
//!     opened: Notify,
//! }
//!
//! impl WebSocketDelegate for Printer {
//!     fn did_open(&self) {
//!         self.opened.notify_one();
//!     }
//!
//!     fn did_receive_message(&self, message: Message) {
//!         println!("received: {message:?}");
//!     }
//!
//!     fn did_close(&self, code: CloseCode, reason: &str, was_clean: bool) {
//!         println!("closed: {code} {reason} clean={was_clean}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let delegate = Arc::new(Printer { opened: Notify::new() });
//!
//!     let socket = WebSocket::new("wss://echo.example.com/chat")?;
//!     socket.set_delegate(&delegate);
//!     socket.open()?;
//!     delegate.opened.notified().await;
//!
//!     socket.send("hello")?;
//!     socket.close()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`WebSocket`], [`WebSocketBuilder`], [`ReadyState`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Frames, codec, close codes, messages |
//! | [`proxy`] | [`TunnelProxy`] and the process-wide registry |
//! | [`transport`] | Streams, handshake, delegate dispatch |

// ============================================================================
// Modules
// ============================================================================

/// Public WebSocket client.
///
/// Use [`WebSocket::new()`] or [`WebSocket::builder()`] to create a socket.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections and tunnels.
pub mod identifiers;

/// WebSocket wire protocol.
///
/// Frame model, incremental codec, close codes and message reassembly.
pub mod protocol;

/// Tunnel proxy.
///
/// Relays a remote WebSocket through a loopback endpoint.
pub mod proxy;

/// Transport layer.
///
/// TCP/TLS streams, the opening handshake and delegate dispatch.
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ReadyState, WebSocket, WebSocketBuilder, WebSocketOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, TunnelId};

// Protocol types
pub use protocol::{CloseCode, CloseInfo, Frame, Message, OpCode};

// Proxy types
pub use proxy::{ProxyCompletion, TunnelProxy};

// Transport types
pub use transport::{DelegateQueue, WebSocketDelegate};
