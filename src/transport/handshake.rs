//! HTTP/1.1 Upgrade handshake (RFC 6455 §4).
//!
//! The client sends a `GET` with a random `Sec-WebSocket-Key`; the server
//! must answer `101 Switching Protocols` with
//! `Sec-WebSocket-Accept = base64(SHA-1(key + GUID))`.
//!
//! # Handshake Flow
//!
//! 1. [`HandshakeRequest::encode`] - build the upgrade request
//! 2. Write it to the transport
//! 3. [`HandshakeResponse::parse`] - read until the header block is complete
//! 4. [`HandshakeRequest::validate`] - check status, headers, accept key and
//!    sub-protocol
//!
//! Bytes the server sent after the header block belong to the first frames
//! and are handed back to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Write as _;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::{Buf, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// GUID appended to the key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version sent in `Sec-WebSocket-Version`.
pub const WEBSOCKET_VERSION: &str = "13";

/// Headers the handshake engine owns; callers may not supply them.
pub const RESERVED_HEADERS: &[&str] = &[
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

/// Upper bound on the response header block.
const MAX_RESPONSE_SIZE: usize = 16 * 1024;

/// Upper bound on response header count.
const MAX_RESPONSE_HEADERS: usize = 64;

// ============================================================================
// Key Derivation
// ============================================================================

/// Generates a fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(nonce)
}

/// Derives the `Sec-WebSocket-Accept` value for `key`.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

// ============================================================================
// HandshakeRequest
// ============================================================================

/// Client side of the upgrade exchange.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    url: Url,
    key: String,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Creates a request with a freshly generated key.
    #[must_use]
    pub fn new(url: Url, protocols: Vec<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            url,
            key: generate_key(),
            protocols,
            headers,
        }
    }

    /// Replaces the generated key.
    #[cfg(test)]
    pub(crate) fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the `Sec-WebSocket-Key` sent.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the offered sub-protocols.
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Serializes the upgrade request.
    ///
    /// Caller headers follow the handshake headers verbatim. An `Origin`
    /// derived from the URL is added unless the caller supplied one.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut resource = self.url.path().to_owned();
        if let Some(query) = self.url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        let host = self.url.host_str().unwrap_or_default();
        let authority = match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let mut out = String::with_capacity(256);
        let _ = write!(out, "GET {resource} HTTP/1.1\r\n");
        let _ = write!(out, "Host: {authority}\r\n");
        out.push_str("Upgrade: websocket\r\n");
        out.push_str("Connection: Upgrade\r\n");
        let _ = write!(out, "Sec-WebSocket-Key: {}\r\n", self.key);
        let _ = write!(out, "Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n");

        if !self.protocols.is_empty() {
            let _ = write!(
                out,
                "Sec-WebSocket-Protocol: {}\r\n",
                self.protocols.join(", ")
            );
        }

        let has_origin = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("origin"));
        if !has_origin {
            let scheme = if self.url.scheme() == "wss" { "https" } else { "http" };
            let _ = write!(out, "Origin: {scheme}://{authority}\r\n");
        }

        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }

        out.push_str("\r\n");
        out
    }

    /// Checks the server's response against this request.
    ///
    /// Returns the negotiated sub-protocol, if the server selected one.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeStatus`] if the status is not 101
    /// - [`Error::Handshake`] if `Upgrade`/`Connection` are missing or wrong,
    ///   or the server picked a protocol that was not offered
    /// - [`Error::AcceptMismatch`] if `Sec-WebSocket-Accept` is wrong
    pub fn validate(&self, response: &HandshakeResponse) -> Result<Option<String>> {
        if response.status != 101 {
            return Err(Error::handshake_status(response.status));
        }

        let upgrade = response
            .header("upgrade")
            .ok_or_else(|| Error::handshake("missing Upgrade header"))?;
        if !upgrade.trim().eq_ignore_ascii_case("websocket") {
            return Err(Error::handshake(format!("unexpected Upgrade: {upgrade}")));
        }

        let connection = response
            .header("connection")
            .ok_or_else(|| Error::handshake("missing Connection header"))?;
        let has_upgrade_token = connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !has_upgrade_token {
            return Err(Error::handshake(format!(
                "unexpected Connection: {connection}"
            )));
        }

        let accept = response
            .header("sec-websocket-accept")
            .ok_or_else(|| Error::handshake("missing Sec-WebSocket-Accept header"))?
            .trim();
        let expected = accept_key(&self.key);
        if accept != expected {
            return Err(Error::accept_mismatch(expected, accept));
        }

        match response.header("sec-websocket-protocol").map(str::trim) {
            None | Some("") => Ok(None),
            Some(selected) if self.protocols.iter().any(|p| p == selected) => {
                Ok(Some(selected.to_owned()))
            }
            Some(selected) => Err(Error::handshake(format!(
                "server selected a protocol that was not offered: {selected}"
            ))),
        }
    }
}

// ============================================================================
// HandshakeResponse
// ============================================================================

/// Parsed status line and headers of the server's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs in arrival order.
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// Parses a response header block.
    ///
    /// Returns the response and the number of bytes it occupied, or
    /// `None` if the block is not complete yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] for malformed HTTP.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut response = httparse::Response::new(&mut headers);

        let consumed = match response.parse(buf) {
            Ok(httparse::Status::Complete(consumed)) => consumed,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(Error::handshake(format!("malformed response: {e}"))),
        };

        let status = response
            .code
            .ok_or_else(|| Error::handshake("response has no status code"))?;
        let headers = response
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_owned(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();

        Ok(Some((Self { status, headers }, consumed)))
    }

    /// Returns the first header named `name`, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Result of a successful handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Negotiated sub-protocol.
    pub protocol: Option<String>,
    /// Bytes read past the response headers.
    pub leftover: BytesMut,
}

/// Runs the upgrade exchange over an already-open transport.
///
/// # Errors
///
/// - [`Error::Io`] if the transport fails
/// - any error of [`HandshakeRequest::validate`]
/// - [`Error::Handshake`] if the peer closes early or the header block is
///   oversized
pub async fn perform<S>(stream: &mut S, request: &HandshakeRequest) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encoded = request.encode();
    trace!(request = %encoded, "Sending upgrade request");
    stream.write_all(encoded.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some((response, consumed)) = HandshakeResponse::parse(&buf)? {
            buf.advance(consumed);
            let protocol = request.validate(&response)?;

            debug!(
                url = %request.url(),
                protocol = protocol.as_deref().unwrap_or(""),
                "Handshake completed"
            );
            return Ok(HandshakeOutcome {
                protocol,
                leftover: buf,
            });
        }

        if buf.len() >= MAX_RESPONSE_SIZE {
            return Err(Error::handshake("response header block too large"));
        }

        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::handshake("connection closed during handshake"));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
