//! Plain or TLS byte stream to the remote endpoint.
//!
//! `ws://` URLs use a bare TCP stream; `wss://` URLs wrap it with
//! rustls, trusting the webpki root set.

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, RootCertStore};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// MaybeTlsStream
// ============================================================================

/// Transport stream, optionally TLS-secured.
#[derive(Debug)]
pub enum MaybeTlsStream {
    /// Unencrypted TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    /// Returns `true` if the stream is TLS-secured.
    #[inline]
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

// ============================================================================
// Connect
// ============================================================================

/// Opens the transport for a `ws://` or `wss://` URL.
///
/// # Errors
///
/// - [`Error::Config`] if the URL has no host or an unsupported scheme
/// - [`Error::Transport`] if the TCP connection fails
/// - [`Error::Tls`] if the TLS handshake fails
pub async fn connect(url: &Url) -> Result<MaybeTlsStream> {
    let secure = match url.scheme() {
        "ws" => false,
        "wss" => true,
        other => return Err(Error::config(format!("unsupported scheme: {other}"))),
    };
    let host = url
        .host_str()
        .ok_or_else(|| Error::config(format!("URL has no host: {url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::config(format!("URL has no port: {url}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::transport(format!("connect to {host}:{port} failed: {e}")))?;
    tcp.set_nodelay(true)?;

    debug!(%host, port, "TCP connection established");

    if !secure {
        return Ok(MaybeTlsStream::Plain(tcp));
    }

    let domain = ServerName::try_from(host.to_owned())
        .map_err(|_| Error::tls(format!("invalid server name: {host}")))?;
    let stream = tls_connector()?
        .connect(domain, tcp)
        .await
        .map_err(|e| Error::tls(e.to_string()))?;

    debug!(%host, "TLS session established");
    Ok(MaybeTlsStream::Tls(Box::new(stream)))
}

/// Shared client TLS configuration.
fn tls_connector() -> Result<TlsConnector> {
    static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

    if let Some(connector) = CONNECTOR.get() {
        return Ok(connector.clone());
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    // Fall back to ring when the host application installed no provider.
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(CONNECTOR
        .get_or_init(|| TlsConnector::from(Arc::new(config)))
        .clone())
}

// ============================================================================
// Tests
// ============================================================================
