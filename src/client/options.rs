//! Connection tuning options.
//!
//! Provides limits and timeouts for a [`WebSocket`](crate::WebSocket).
//! Options can be built fluently or loaded from JSON.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ws_tunnel::WebSocketOptions;
//!
//! let options = WebSocketOptions::new()
//!     .with_max_message_size(1 << 20)
//!     .with_fragment_size(16 * 1024)
//!     .with_close_timeout(Duration::from_secs(2));
//!
//! let from_json = WebSocketOptions::from_json(r#"{ "fragmentSize": 1024 }"#).unwrap();
//! assert_eq!(from_json.fragment_size, 1024);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default maximum size of an inbound message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 << 20;

/// Default size above which outbound messages are fragmented (64 KiB).
pub const DEFAULT_FRAGMENT_SIZE: usize = 64 << 10;

/// Default time to wait for the peer's close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for TCP connect, TLS and the upgrade handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// WebSocketOptions
// ============================================================================

/// Limits and timeouts for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketOptions {
    /// Largest inbound message (and frame) accepted, in bytes.
    pub max_message_size: usize,

    /// Outbound payloads larger than this are split into fragments.
    pub fragment_size: usize,

    /// How long to wait in CLOSING for the peer's close frame.
    #[serde(rename = "closeTimeoutMs", with = "duration_ms")]
    pub close_timeout: Duration,

    /// Deadline for transport setup plus handshake.
    #[serde(rename = "connectTimeoutMs", with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl WebSocketOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Parses options from a JSON object. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl WebSocketOptions {
    /// Sets the maximum inbound message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the outbound fragmentation threshold.
    #[inline]
    #[must_use]
    pub fn with_fragment_size(mut self, bytes: usize) -> Self {
        self.fragment_size = bytes;
        self
    }

    /// Sets the close handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the connect + handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl WebSocketOptions {
    /// Checks that every limit is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero size or timeout.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(Error::config("maxMessageSize must be greater than zero"));
        }
        if self.fragment_size == 0 {
            return Err(Error::config("fragmentSize must be greater than zero"));
        }
        if self.close_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
