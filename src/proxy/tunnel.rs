//! Tunnel proxy: one remote WebSocket exposed through a local relay.
//!
//! # Lifecycle
//!
//! ```text
//!  connect()                         did_open
//!  ───────► [pending] ─── handshake ─────────► [connected] ── completion(local url)
//!              │                                   │
//!              │ did_fail / did_close              │ disconnect() / remote closed
//!              ▼                                   ▼
//!          [idle] ◄────────────────────────────── [idle]
//! ```
//!
//! Each `connect` starts a new generation; events from an older
//! generation's socket are ignored once it has been replaced or torn down.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{WebSocket, WebSocketOptions};
use crate::error::{Error, Result};
use crate::identifiers::TunnelId;
use crate::protocol::{CloseCode, Message};
use crate::transport::WebSocketDelegate;

use super::registry;
use super::relay::LocalRelay;

// ============================================================================
// Types
// ============================================================================

/// Completion invoked once with the local proxy URL.
pub type ProxyCompletion = Box<dyn FnOnce(String) + Send + 'static>;

/// Connection events relayed to the tunnel's driver task.
#[derive(Debug)]
enum TunnelEvent {
    Open,
    Message(Message),
    Ended,
}

// ============================================================================
// TunnelProxy
// ============================================================================

/// Maintains a WebSocket tunnel to one remote URL.
///
/// Clones share the same tunnel. Dropping the last clone tears it down.
///
/// # Example
///
/// ```no_run
/// use ws_tunnel::TunnelProxy;
///
/// # fn example() -> ws_tunnel::Result<()> {
/// let tunnel = TunnelProxy::new("wss://target.example/socket", |local_url| {
///     println!("proxying via {local_url}");
/// });
/// tunnel.connect()?;
///
/// // later
/// tunnel.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TunnelProxy {
    inner: Arc<TunnelInner>,
}

struct TunnelInner {
    id: TunnelId,
    url: String,
    key: String,
    options: WebSocketOptions,
    /// Taken on the first successful connect.
    completion: Mutex<Option<ProxyCompletion>>,
    /// Pending or established connection.
    session: Mutex<Option<Session>>,
    connected: AtomicBool,
    generation: AtomicU64,
}

struct Session {
    generation: u64,
    socket: WebSocket,
    relay: Option<LocalRelay>,
    /// Kept alive here; the socket only holds it weakly.
    _delegate: Arc<TunnelDelegate>,
}

// ============================================================================
// TunnelProxy - Constructors
// ============================================================================

impl TunnelProxy {
    /// Creates an idle tunnel to `url`.
    ///
    /// `completion` runs once, with the local proxy URL, after the first
    /// successful connect.
    pub fn new<F>(url: impl Into<String>, completion: F) -> Self
    where
        F: FnOnce(String) + Send + 'static,
    {
        Self::with_options(url, WebSocketOptions::default(), completion)
    }

    /// Creates an idle tunnel using `options` for the remote connection.
    pub fn with_options<F>(url: impl Into<String>, options: WebSocketOptions, completion: F) -> Self
    where
        F: FnOnce(String) + Send + 'static,
    {
        let url = url.into();
        let key = registry::normalize(&url);

        Self {
            inner: Arc::new(TunnelInner {
                id: TunnelId::generate(),
                url,
                key,
                options,
                completion: Mutex::new(Some(Box::new(completion))),
                session: Mutex::new(None),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

// ============================================================================
// TunnelProxy - Public API
// ============================================================================

impl TunnelProxy {
    /// Returns `true` if an established tunnel targets `url`.
    #[must_use]
    pub fn is_proxying(url: &str) -> bool {
        registry::is_proxying(url)
    }

    /// Returns the tunnel identifier used in logs.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TunnelId {
        self.inner.id
    }

    /// Returns the remote URL as given.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns `true` once the remote is open and the relay is listening.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the relay's address while connected.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .session
            .lock()
            .as_ref()
            .and_then(|session| session.relay.as_ref())
            .map(LocalRelay::local_addr)
    }

    /// Returns the relay's `ws://` URL while connected.
    #[must_use]
    pub fn local_url(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .and_then(|session| session.relay.as_ref())
            .map(LocalRelay::ws_url)
    }

    /// Opens the remote connection.
    ///
    /// A no-op when already connected or connecting. Completion is
    /// reported through the callback given at construction; on failure
    /// the tunnel returns to idle and `connect` may be called again.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] / [`Error::InvalidUrl`] if the URL is unusable
    /// - [`Error::Config`] outside a tokio runtime
    pub fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let mut session = inner.session.lock();
        if session.is_some() {
            debug!(tunnel_id = %inner.id, "Tunnel already connected or connecting");
            return Ok(());
        }

        let socket = WebSocket::builder()
            .url(inner.url.as_str())
            .options(inner.options.clone())
            .build()?;

        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let delegate = Arc::new(TunnelDelegate { tx });
        socket.set_delegate(&delegate);
        socket.open()?;

        tokio::spawn(drive(Arc::downgrade(inner), generation, rx));

        debug!(tunnel_id = %inner.id, url = %inner.url, generation, "Tunnel connecting");
        *session = Some(Session {
            generation,
            socket,
            relay: None,
            _delegate: delegate,
        });
        Ok(())
    }

    /// Closes the remote connection with 1000 and stops the relay.
    ///
    /// Also cancels a connect still in progress. A no-op when idle.
    pub fn disconnect(&self) {
        let Some(session) = self.inner.end_session(None) else {
            return;
        };

        if let Err(e) = session.socket.close_with(CloseCode::Normal, "") {
            debug!(tunnel_id = %self.inner.id, error = %e, "Close on disconnect failed");
        }
        info!(tunnel_id = %self.inner.id, url = %self.inner.url, "Tunnel disconnected");
    }
}

impl fmt::Debug for TunnelProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelProxy")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TunnelInner - Event Handling
// ============================================================================

impl TunnelInner {
    /// Remote is open: start the relay, then report the local URL.
    async fn on_open(&self, generation: u64) {
        let socket = match self.session.lock().as_ref() {
            Some(session) if session.generation == generation => session.socket.clone(),
            _ => return,
        };

        let relay = match LocalRelay::bind(socket.clone(), self.id).await {
            Ok(relay) => relay,
            Err(e) => {
                warn!(tunnel_id = %self.id, error = %e, "Local relay failed to start");
                if self.end_session(Some(generation)).is_some() {
                    let _ = socket.close_with(CloseCode::Normal, "");
                }
                return;
            }
        };
        let local_url = relay.ws_url();

        {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(session) if session.generation == generation => {
                    session.relay = Some(relay);
                }
                // Disconnected while the relay was binding.
                _ => return,
            }
            registry::register(&self.key, self.id);
            self.connected.store(true, Ordering::Release);
        }

        info!(tunnel_id = %self.id, url = %self.url, local = %local_url, "Tunnel established");

        let completion = self.completion.lock().take();
        if let Some(completion) = completion {
            completion(local_url);
        }
    }

    fn on_remote_message(&self, generation: u64, message: Message) {
        let session = self.session.lock();
        if let Some(session) = session.as_ref()
            && session.generation == generation
            && let Some(relay) = &session.relay
        {
            relay.forward(message);
        }
    }

    fn on_ended(&self, generation: u64) {
        if self.end_session(Some(generation)).is_some() {
            info!(tunnel_id = %self.id, url = %self.url, "Tunnel closed by remote");
        }
    }

    /// Takes the session if it matches `generation` (any, when `None`).
    ///
    /// `connected` and the registry only change under the session lock.
    fn end_session(&self, generation: Option<u64>) -> Option<Session> {
        let mut slot = self.session.lock();
        let matches = slot
            .as_ref()
            .is_some_and(|s| generation.is_none_or(|g| s.generation == g));
        if !matches {
            return None;
        }

        if self.connected.load(Ordering::Acquire) {
            registry::unregister(&self.key, self.id);
            self.connected.store(false, Ordering::Release);
        }
        slot.take()
    }
}

impl Drop for TunnelInner {
    fn drop(&mut self) {
        if *self.connected.get_mut() {
            registry::unregister(&self.key, self.id);
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Applies connection events to the tunnel until the session ends.
async fn drive(
    inner: Weak<TunnelInner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TunnelEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        match event {
            TunnelEvent::Open => inner.on_open(generation).await,
            TunnelEvent::Message(message) => inner.on_remote_message(generation, message),
            TunnelEvent::Ended => {
                inner.on_ended(generation);
                return;
            }
        }
    }
}

// ============================================================================
// TunnelDelegate
// ============================================================================

/// Forwards socket callbacks to the driver task.
struct TunnelDelegate {
    tx: mpsc::UnboundedSender<TunnelEvent>,
}

impl WebSocketDelegate for TunnelDelegate {
    fn did_open(&self) {
        let _ = self.tx.send(TunnelEvent::Open);
    }

    fn did_receive_message(&self, message: Message) {
        let _ = self.tx.send(TunnelEvent::Message(message));
    }

    fn did_fail_with_error(&self, error: Error) {
        warn!(error = %error, "Tunnel connection failed");
        let _ = self.tx.send(TunnelEvent::Ended);
    }

    fn did_close(&self, code: CloseCode, reason: &str, was_clean: bool) {
        debug!(%code, reason, was_clean, "Tunnel connection closed");
        let _ = self.tx.send(TunnelEvent::Ended);
    }
}

// ============================================================================
// Tests
// ============================================================================
