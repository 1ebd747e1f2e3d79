//! Tunnel proxy.
//!
//! Exposes a remote WebSocket endpoint through a loopback relay so that
//! local content can talk to it as if it were the remote server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ws://127.0.0.1:PORT   ┌────────────┐   ws(s)://   ┌──────────┐
//! │ Local peers  │◄───────────────────────►│ LocalRelay │◄────────────►│  Remote  │
//! │ (web content)│                         │ + WebSocket│              │  server  │
//! └──────────────┘                         └────────────┘              └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `registry` | Process-wide set of proxied targets (`is_proxying`) |
//! | `relay` | Loopback WebSocket endpoint |
//! | `tunnel` | `TunnelProxy` lifecycle |

// ============================================================================
// Submodules
// ============================================================================

/// Process-wide tunnel registry.
pub mod registry;

/// Loopback relay server.
pub(crate) mod relay;

/// Tunnel lifecycle.
pub mod tunnel;

// ============================================================================
// Re-exports
// ============================================================================

pub use tunnel::{ProxyCompletion, TunnelProxy};
