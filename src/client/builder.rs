//! Builder pattern for WebSocket configuration.
//!
//! Provides a fluent API for configuring and creating [`WebSocket`]
//! instances, including the extra request headers a host may carry over
//! from an existing HTTP request.
//!
//! # Example
//!
//! ```no_run
//! use ws_tunnel::{WebSocket, WebSocketOptions};
//!
//! # fn example() -> ws_tunnel::Result<()> {
//! let socket = WebSocket::builder()
//!     .url("wss://echo.example/ws")
//!     .protocols(["chat", "superchat"])
//!     .header("Authorization", "Bearer token")
//!     .options(WebSocketOptions::new().with_fragment_size(16 * 1024))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use url::Url;

use crate::error::{Error, Result};
use crate::transport::delegate::{self, DelegateQueue, WebSocketDelegate};
use crate::transport::handshake::RESERVED_HEADERS;

use super::options::WebSocketOptions;
use super::socket::{SocketParts, WebSocket};

// ============================================================================
// Constants
// ============================================================================

/// Characters RFC 7230 excludes from a token.
const SEPARATORS: &str = "()<>@,;:\\\"/[]?={}";

// ============================================================================
// WebSocketBuilder
// ============================================================================

/// Builder for configuring a [`WebSocket`].
///
/// Use [`WebSocket::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct WebSocketBuilder {
    /// Target URL, parsed in `build`.
    url: Option<String>,
    /// Offered sub-protocols, in preference order.
    protocols: Vec<String>,
    /// Extra handshake headers.
    headers: Vec<(String, String)>,
    /// Limits and timeouts.
    options: WebSocketOptions,
    /// Queue for delegate callbacks.
    delegate_queue: Option<DelegateQueue>,
    /// Initial delegate.
    delegate: Option<Weak<dyn WebSocketDelegate>>,
}

// ============================================================================
// WebSocketBuilder Implementation
// ============================================================================

impl WebSocketBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `ws://` or `wss://` URL to connect to.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds one offered sub-protocol.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Adds offered sub-protocols, in preference order.
    #[must_use]
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Adds a header sent verbatim with the upgrade request.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds several upgrade request headers.
    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Replaces the connection options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: WebSocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Routes delegate callbacks through `queue`.
    ///
    /// Without one, the socket creates its own queue on `open`.
    #[inline]
    #[must_use]
    pub fn delegate_queue(mut self, queue: DelegateQueue) -> Self {
        self.delegate_queue = Some(queue);
        self
    }

    /// Sets the delegate. Only a weak reference is kept.
    #[inline]
    #[must_use]
    pub fn delegate<D: WebSocketDelegate>(mut self, delegate: &Arc<D>) -> Self {
        self.delegate = Some(delegate::downgrade(delegate));
        self
    }

    /// Builds the socket with validation. The socket starts CONNECTING.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is missing, not `ws`/`wss`, or has no host
    /// - [`Error::InvalidUrl`] if the URL does not parse
    /// - [`Error::InvalidArgument`] for a malformed protocol or header
    /// - [`Error::Config`] if the options are out of range
    pub fn build(self) -> Result<WebSocket> {
        let url = self.validate_url()?;
        self.validate_protocols()?;
        self.validate_headers()?;
        self.options.validate()?;

        Ok(WebSocket::from_parts(SocketParts {
            url,
            protocols: self.protocols,
            headers: self.headers,
            options: self.options,
            delegate_queue: self.delegate_queue,
            delegate: self.delegate,
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl WebSocketBuilder {
    fn validate_url(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            Error::config(
                "WebSocket URL is required. Use .url() to set it.\n\
                 Example: WebSocket::builder().url(\"wss://echo.example/ws\")",
            )
        })?;

        let mut url = Url::parse(raw)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "unsupported scheme '{}': expected ws or wss",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::config(format!("URL has no host: {raw}")));
        }

        // Fragments are meaningless for WebSocket URIs.
        url.set_fragment(None);
        Ok(url)
    }

    fn validate_protocols(&self) -> Result<()> {
        for (index, protocol) in self.protocols.iter().enumerate() {
            if !is_token(protocol) {
                return Err(Error::invalid_argument(format!(
                    "invalid sub-protocol '{protocol}'"
                )));
            }
            if self.protocols[..index].contains(protocol) {
                return Err(Error::invalid_argument(format!(
                    "duplicate sub-protocol '{protocol}'"
                )));
            }
        }
        Ok(())
    }

    fn validate_headers(&self) -> Result<()> {
        for (name, value) in &self.headers {
            if !is_token(name) {
                return Err(Error::invalid_argument(format!(
                    "invalid header name '{name}'"
                )));
            }
            if RESERVED_HEADERS
                .iter()
                .any(|reserved| name.eq_ignore_ascii_case(reserved))
            {
                return Err(Error::invalid_argument(format!(
                    "header '{name}' is set by the handshake"
                )));
            }
            if value.contains(['\r', '\n']) {
                return Err(Error::invalid_argument(format!(
                    "header '{name}' value contains a line break"
                )));
            }
        }
        Ok(())
    }
}

/// Returns `true` if `s` is a non-empty HTTP token.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(c))
}

// ============================================================================
// Tests
// ============================================================================
