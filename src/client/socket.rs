//! The public WebSocket client.
//!
//! A [`WebSocket`] is a cheap, clonable handle. Every method is
//! non-blocking: calls are validated synchronously and then queued to the
//! connection's event loop. Outcomes (open, messages, close, failure)
//! arrive only through the [`WebSocketDelegate`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ws_tunnel::{Message, WebSocket, WebSocketDelegate};
//!
//! struct Printer;
//!
//! impl WebSocketDelegate for Printer {
//!     fn did_receive_message(&self, message: Message) {
//!         println!("{message:?}");
//!     }
//! }
//!
//! # async fn example() -> ws_tunnel::Result<()> {
//! let delegate = Arc::new(Printer);
//! let socket = WebSocket::new("wss://echo.example/ws")?;
//! socket.set_delegate(&delegate);
//! socket.open()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{CloseCode, CloseInfo, MAX_CLOSE_REASON, MAX_CONTROL_PAYLOAD, Message};
use crate::transport::connection::{ConnectionCommand, ConnectionTask};
use crate::transport::delegate::{
    self, DelegateEvent, DelegateQueue, DelegateSlot, EventDispatcher, WebSocketDelegate,
};
use crate::transport::handshake::HandshakeRequest;

use super::builder::WebSocketBuilder;
use super::options::WebSocketOptions;
use super::state::{ReadyState, SharedState};

// ============================================================================
// SocketParts
// ============================================================================

/// Validated configuration handed over by the builder.
pub(crate) struct SocketParts {
    pub url: Url,
    pub protocols: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub options: WebSocketOptions,
    pub delegate_queue: Option<DelegateQueue>,
    pub delegate: Option<Weak<dyn WebSocketDelegate>>,
}

// ============================================================================
// SocketInner
// ============================================================================

#[derive(Debug)]
struct SocketInner {
    id: ConnectionId,
    url: Url,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
    options: WebSocketOptions,
    state: Arc<SharedState>,
    delegate: DelegateSlot,
    delegate_queue: Mutex<Option<DelegateQueue>>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Taken by `open`; `None` afterwards.
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionCommand>>>,
}

// ============================================================================
// WebSocket
// ============================================================================

/// RFC 6455 WebSocket client.
///
/// Created CONNECTING; [`open`](Self::open) must be called exactly once.
/// Clones share the same connection. When the last clone is dropped an
/// open connection is closed with 1001 (going away).
///
/// # Thread Safety
///
/// `WebSocket` is `Send + Sync`; methods may be called from any task or
/// thread and are serialized onto the connection's event loop.
#[derive(Debug, Clone)]
pub struct WebSocket {
    inner: Arc<SocketInner>,
}

// ============================================================================
// WebSocket - Constructors
// ============================================================================

impl WebSocket {
    /// Creates a socket for `url` with default options.
    ///
    /// # Errors
    ///
    /// See [`WebSocketBuilder::build`].
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::builder().url(url).build()
    }

    /// Creates a socket offering `protocols`, in preference order.
    ///
    /// # Errors
    ///
    /// See [`WebSocketBuilder::build`].
    pub fn with_protocols<I, S>(url: impl Into<String>, protocols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().url(url).protocols(protocols).build()
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> WebSocketBuilder {
        WebSocketBuilder::new()
    }

    pub(crate) fn from_parts(parts: SocketParts) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let delegate = delegate::empty_slot();
        *delegate.write() = parts.delegate;

        Self {
            inner: Arc::new(SocketInner {
                id: ConnectionId::generate(),
                url: parts.url,
                protocols: parts.protocols,
                headers: parts.headers,
                options: parts.options,
                state: Arc::new(SharedState::default()),
                delegate,
                delegate_queue: Mutex::new(parts.delegate_queue),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
            }),
        }
    }
}

// ============================================================================
// WebSocket - Accessors
// ============================================================================

impl WebSocket {
    /// Returns the connection identifier used in logs.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the current ready state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.ready_state()
    }

    /// Returns the negotiated sub-protocol.
    ///
    /// `None` until the handshake has validated the server's choice, and
    /// when the server selected none.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.inner.state.protocol()
    }

    /// Returns the offered sub-protocols.
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.inner.protocols
    }

    /// Returns the connection options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &WebSocketOptions {
        &self.inner.options
    }
}

// ============================================================================
// WebSocket - Delegate
// ============================================================================

impl WebSocket {
    /// Sets the delegate. Only a weak reference is kept.
    ///
    /// Takes effect for every event not yet delivered.
    pub fn set_delegate<D: WebSocketDelegate>(&self, delegate: &Arc<D>) {
        *self.inner.delegate.write() = Some(delegate::downgrade(delegate));
    }

    /// Removes the delegate; later events are dropped.
    pub fn clear_delegate(&self) {
        *self.inner.delegate.write() = None;
    }

    /// Routes delegate callbacks through `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] once `open` has been called.
    pub fn set_delegate_queue(&self, queue: DelegateQueue) -> Result<()> {
        if self.inner.command_rx.lock().is_none() {
            return Err(Error::invalid_state(
                "set delegate queue",
                self.ready_state(),
            ));
        }
        *self.inner.delegate_queue.lock() = Some(queue);
        Ok(())
    }

    /// Returns the delegate queue, creating one on the current runtime.
    fn delegate_queue(&self) -> Result<DelegateQueue> {
        let mut guard = self.inner.delegate_queue.lock();
        if let Some(queue) = guard.as_ref() {
            return Ok(queue.clone());
        }
        let queue = DelegateQueue::new()?;
        *guard = Some(queue.clone());
        Ok(queue)
    }

    fn dispatcher(&self) -> Result<EventDispatcher> {
        Ok(EventDispatcher::new(
            Arc::clone(&self.inner.delegate),
            self.delegate_queue()?,
        ))
    }
}

// ============================================================================
// WebSocket - Operations
// ============================================================================

impl WebSocket {
    /// Starts connecting. Must be called exactly once, inside a tokio runtime.
    ///
    /// Returns immediately; the outcome is reported through `did_open` or
    /// `did_fail_with_error`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyOpened`] on a second call
    /// - [`Error::InvalidState`] if the socket was closed before opening
    /// - [`Error::Config`] outside a tokio runtime
    pub fn open(&self) -> Result<()> {
        let state = self.ready_state();
        if state != ReadyState::Connecting {
            return Err(Error::invalid_state("open", state));
        }

        Handle::try_current()
            .map_err(|e| Error::config(format!("open needs a tokio runtime: {e}")))?;
        let events = self.dispatcher()?;

        let commands = self
            .inner
            .command_rx
            .lock()
            .take()
            .ok_or(Error::AlreadyOpened)?;

        let inner = &self.inner;
        let request = HandshakeRequest::new(
            inner.url.clone(),
            inner.protocols.clone(),
            inner.headers.clone(),
        );

        ConnectionTask::new(
            inner.id,
            request,
            inner.options.clone(),
            Arc::clone(&inner.state),
            events,
        )
        .spawn(commands);

        Ok(())
    }

    /// Queues a text or binary message.
    ///
    /// Payloads above the fragment size are sent as several frames.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless OPEN
    /// - [`Error::ConnectionClosed`] if the event loop has exited
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.ensure_open("send")?;
        self.command(ConnectionCommand::Send(message.into()))
    }

    /// Queues a ping. The payload may be empty.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the payload exceeds 125 bytes
    /// - [`Error::InvalidState`] unless OPEN
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::invalid_argument(format!(
                "ping payload of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                payload.len()
            )));
        }
        self.ensure_open("send ping")?;
        self.command(ConnectionCommand::Ping(payload))
    }

    /// Closes with 1000 (normal) and no reason.
    ///
    /// # Errors
    ///
    /// See [`close_with`](Self::close_with).
    pub fn close(&self) -> Result<()> {
        self.close_with(CloseCode::Normal, "")
    }

    /// Closes with `code` and `reason`.
    ///
    /// While OPEN, sends a close frame and waits up to the close timeout
    /// for the peer's reply. While CONNECTING, moves straight to CLOSED,
    /// aborts the handshake and reports `did_close(1006, "", false)`;
    /// `did_open` never follows. A no-op once CLOSING or CLOSED.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] unless `code` is 1000 or 3000-4999
    /// - [`Error::InvalidArgument`] if `reason` exceeds 123 bytes
    pub fn close_with(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !code.is_allowed_for_application() {
            return Err(Error::invalid_argument(format!(
                "close code {code} is reserved; use 1000 or 3000-4999"
            )));
        }
        if reason.len() > MAX_CLOSE_REASON {
            return Err(Error::invalid_argument(format!(
                "close reason of {} bytes exceeds {MAX_CLOSE_REASON}",
                reason.len()
            )));
        }

        loop {
            match self.ready_state() {
                ReadyState::Connecting => {
                    let never_opened = self.inner.command_rx.lock().take().is_some();
                    if never_opened {
                        self.close_unopened();
                        return Ok(());
                    }
                    // Lost to the event loop reaching OPEN; retry as an open close.
                    if !self
                        .inner
                        .state
                        .transition(ReadyState::Connecting, ReadyState::Closed)
                    {
                        continue;
                    }
                    debug!(connection_id = %self.inner.id, "Closed while connecting");
                    // The event loop reports the close whether or not it reads this.
                    let _ = self.inner.command_tx.send(ConnectionCommand::Close {
                        code,
                        reason: reason.to_owned(),
                    });
                    return Ok(());
                }
                ReadyState::Open => {
                    self.inner.state.advance(ReadyState::Closing);
                    return self.command(ConnectionCommand::Close {
                        code,
                        reason: reason.to_owned(),
                    });
                }
                state => {
                    debug!(connection_id = %self.inner.id, %state, "Close ignored");
                    return Ok(());
                }
            }
        }
    }

    /// Reports the abort of a socket whose event loop never started.
    fn close_unopened(&self) {
        if !self.inner.state.advance(ReadyState::Closed) {
            return;
        }
        debug!(connection_id = %self.inner.id, "Closed before open");

        match self.dispatcher() {
            Ok(events) => events.emit(DelegateEvent::Closed(CloseInfo::abnormal())),
            Err(e) => debug!(error = %e, "No delegate queue; close not reported"),
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.ready_state() {
            ReadyState::Open => Ok(()),
            state => Err(Error::invalid_state(operation, state)),
        }
    }

    fn command(&self, command: ConnectionCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
