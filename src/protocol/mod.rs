//! WebSocket wire protocol (RFC 6455).
//!
//! This module defines the frame data model and the incremental codec
//! that translates between frames and a raw byte stream.
//!
//! # Frame Types
//!
//! | OpCode | Kind | Purpose |
//! |--------|------|---------|
//! | `0x0` | Data | Continuation of a fragmented message |
//! | `0x1` | Data | UTF-8 text |
//! | `0x2` | Data | Binary |
//! | `0x8` | Control | Close |
//! | `0x9` | Control | Ping |
//! | `0xA` | Control | Pong |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `close` | Close status codes and close payloads |
//! | `codec` | Frame encoder/decoder |
//! | `frame` | `OpCode` and `Frame` |
//! | `message` | Messages and fragment reassembly |

// ============================================================================
// Submodules
// ============================================================================

/// Close status codes and close payloads.
pub mod close;

/// Incremental frame encoder/decoder.
pub mod codec;

/// Frame data model.
pub mod frame;

/// Application messages and reassembly.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use close::{CloseCode, CloseInfo, MAX_CLOSE_REASON, close_payload};
pub use codec::{FrameCodec, Role, apply_mask, encode_frame};
pub use frame::{Frame, MAX_CONTROL_PAYLOAD, OpCode};
pub use message::{Message, MessageAssembler};
