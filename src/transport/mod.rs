//! Socket, handshake and connection layer.
//!
//! Everything between a `ws://`/`wss://` URL and a stream of delegate
//! callbacks lives here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌────────────────┐   frames   ┌──────────┐
//! │  WebSocket   │────────────►│ ConnectionTask │◄──────────►│  Server  │
//! │  (handles)   │   (mpsc)    │  (event loop)  │  TCP/TLS   │          │
//! └──────────────┘             └───────┬────────┘            └──────────┘
//!                                      │ events
//!                                      ▼
//!                              ┌────────────────┐
//!                              │ DelegateQueue  │──► WebSocketDelegate
//!                              └────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `stream::connect` - TCP, plus TLS for `wss://`
//! 2. `handshake::perform` - HTTP upgrade
//! 3. `ConnectionTask` - frames in, commands out, until CLOSED
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | State machine and event loop |
//! | `delegate` | Delegate trait and serial callback queue |
//! | `handshake` | Upgrade request and response validation |
//! | `stream` | Plain/TLS byte stream |

// ============================================================================
// Submodules
// ============================================================================

/// Connection state machine and event loop.
pub(crate) mod connection;

/// Delegate callbacks and dispatch.
pub mod delegate;

/// HTTP upgrade handshake.
pub mod handshake;

/// TCP/TLS transport stream.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use delegate::{DelegateQueue, WebSocketDelegate};
pub use handshake::{HandshakeRequest, HandshakeResponse, accept_key, generate_key};
pub use stream::MaybeTlsStream;
