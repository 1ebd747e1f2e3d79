//! Delegate callbacks and their serial dispatch queue.
//!
//! The connection never owns its delegate: it keeps a [`Weak`] reference
//! and upgrades it each time an event is delivered. Events are run on a
//! [`DelegateQueue`], a single tokio task draining jobs in order, so a
//! delegate never races with itself.
//!
//! # Callbacks
//!
//! | Callback | Fired when |
//! |----------|------------|
//! | `did_open` | Handshake succeeded, state is OPEN |
//! | `did_receive_message` | A complete text or binary message arrived |
//! | `did_receive_pong` | A pong frame arrived |
//! | `did_fail_with_error` | Transport, handshake or protocol failure |
//! | `did_close` | Close completed (clean or not) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{CloseCode, CloseInfo, Message};

// ============================================================================
// Types
// ============================================================================

/// Unit of work run on a [`DelegateQueue`].
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Non-owning delegate reference shared by a handle and its event loop.
pub(crate) type DelegateSlot = Arc<RwLock<Option<Weak<dyn WebSocketDelegate>>>>;

// ============================================================================
// WebSocketDelegate
// ============================================================================

/// Receiver of connection events.
///
/// Only [`did_receive_message`](Self::did_receive_message) is required.
/// Callbacks run on the connection's [`DelegateQueue`]; they should not
/// block for long, since later events wait behind them.
pub trait WebSocketDelegate: Send + Sync + 'static {
    /// The connection is open.
    fn did_open(&self) {}

    /// A complete message arrived.
    fn did_receive_message(&self, message: Message);

    /// A pong arrived with `payload`.
    fn did_receive_pong(&self, payload: Bytes) {
        let _ = payload;
    }

    /// The connection failed and is now CLOSED.
    fn did_fail_with_error(&self, error: Error) {
        let _ = error;
    }

    /// The connection is CLOSED.
    fn did_close(&self, code: CloseCode, reason: &str, was_clean: bool) {
        let _ = (code, reason, was_clean);
    }
}

// ============================================================================
// DelegateQueue
// ============================================================================

/// Serial executor for delegate callbacks.
///
/// Cloning yields a handle to the same queue. The backing task exits
/// once every handle is dropped.
#[derive(Clone)]
pub struct DelegateQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl DelegateQueue {
    /// Creates a queue on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when called outside a runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::config(format!("delegate queue needs a tokio runtime: {e}")))?;
        Ok(Self::on(&handle))
    }

    /// Creates a queue whose task runs on `handle`.
    #[must_use]
    pub fn on(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("Delegate callback panicked");
                }
            }
            trace!("Delegate queue drained");
        });

        Self { tx }
    }

    /// Enqueues `job`. Returns `false` if the queue task is gone.
    pub(crate) fn dispatch(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }
}

impl fmt::Debug for DelegateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// ============================================================================
// DelegateEvent
// ============================================================================

/// Event produced by the connection's event loop.
#[derive(Debug)]
pub(crate) enum DelegateEvent {
    Open,
    Message(Message),
    Pong(Bytes),
    Failed(Error),
    Closed(CloseInfo),
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Delivers [`DelegateEvent`]s to whichever delegate is set at delivery time.
#[derive(Debug, Clone)]
pub(crate) struct EventDispatcher {
    slot: DelegateSlot,
    queue: DelegateQueue,
}

impl EventDispatcher {
    pub(crate) fn new(slot: DelegateSlot, queue: DelegateQueue) -> Self {
        Self { slot, queue }
    }

    pub(crate) fn emit(&self, event: DelegateEvent) {
        let slot = Arc::clone(&self.slot);

        let queued = self.queue.dispatch(Box::new(move || {
            let delegate = slot.read().as_ref().and_then(Weak::upgrade);
            let Some(delegate) = delegate else {
                trace!(?event, "No delegate; event dropped");
                return;
            };

            match event {
                DelegateEvent::Open => delegate.did_open(),
                DelegateEvent::Message(message) => delegate.did_receive_message(message),
                DelegateEvent::Pong(payload) => delegate.did_receive_pong(payload),
                DelegateEvent::Failed(error) => delegate.did_fail_with_error(error),
                DelegateEvent::Closed(info) => {
                    delegate.did_close(info.code, &info.reason, info.was_clean);
                }
            }
        }));

        if !queued {
            warn!("Delegate queue closed; event dropped");
        }
    }
}

/// Creates an empty delegate slot.
pub(crate) fn empty_slot() -> DelegateSlot {
    Arc::new(RwLock::new(None))
}

/// Downgrades `delegate` into a slot value.
pub(crate) fn downgrade<D: WebSocketDelegate>(delegate: &Arc<D>) -> Weak<dyn WebSocketDelegate> {
    let weak: Weak<D> = Arc::downgrade(delegate);
    weak
}

// ============================================================================
// Tests
// ============================================================================
