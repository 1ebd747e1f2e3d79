//! Loopback WebSocket endpoint standing in for the remote server.
//!
//! Local peers (typically embedded web content) connect to
//! `ws://127.0.0.1:{port}`. Their text and binary messages are sent over
//! the tunnel's remote [`WebSocket`]; messages from the remote are fanned
//! out to every local peer.
//!
//! # Connection Flow
//!
//! 1. `LocalRelay::bind` - bind `127.0.0.1:0`, start the accept loop
//! 2. Peer connects, upgraded with `tokio_tungstenite::accept_async`
//! 3. Peer task pumps messages both ways until either side leaves
//! 4. Dropping the relay closes every peer

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, trace, warn};

use crate::client::WebSocket;
use crate::error::Result;
use crate::identifiers::TunnelId;
use crate::protocol::Message;

// ============================================================================
// Constants
// ============================================================================

/// Remote messages buffered per slow local peer before it lags.
const FANOUT_CAPACITY: usize = 256;

// ============================================================================
// LocalRelay
// ============================================================================

/// Loopback endpoint bridging local peers to one remote connection.
#[derive(Debug)]
pub(crate) struct LocalRelay {
    addr: SocketAddr,
    fanout: broadcast::Sender<Message>,
    shutdown: watch::Sender<bool>,
}

impl LocalRelay {
    /// Binds a loopback listener and starts accepting peers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub(crate) async fn bind(remote: WebSocket, tunnel_id: TunnelId) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
        let addr = listener.local_addr()?;

        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            remote,
            fanout.clone(),
            shutdown_rx,
            tunnel_id,
        ));

        info!(%tunnel_id, port = addr.port(), "Local relay bound");

        Ok(Self {
            addr,
            fanout,
            shutdown,
        })
    }

    /// Returns the relay URL, `ws://127.0.0.1:{port}`.
    #[inline]
    #[must_use]
    pub(crate) fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.addr.port())
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends a remote message to every connected peer.
    pub(crate) fn forward(&self, message: Message) {
        // No receivers simply means no peers yet.
        let _ = self.fanout.send(message);
    }
}

impl Drop for LocalRelay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn accept_loop(
    listener: TcpListener,
    remote: WebSocket,
    fanout: broadcast::Sender<Message>,
    mut shutdown: watch::Receiver<bool>,
    tunnel_id: TunnelId,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%tunnel_id, %peer, "Local peer connected");
                    tokio::spawn(serve_peer(
                        stream,
                        remote.clone(),
                        fanout.subscribe(),
                        shutdown.clone(),
                        tunnel_id,
                    ));
                }
                Err(e) => {
                    warn!(%tunnel_id, error = %e, "Local accept failed");
                }
            },

            _ = shutdown.changed() => break,
        }
    }

    debug!(%tunnel_id, "Local relay stopped");
}

async fn serve_peer(
    stream: TcpStream,
    remote: WebSocket,
    mut inbound: broadcast::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
    tunnel_id: TunnelId,
) {
    let ws_stream = match upgrade(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            debug!(%tunnel_id, error = %e, "Local peer upgrade failed");
            return;
        }
    };
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Local peer → remote
            message = ws_read.next() => {
                let forwarded = match message {
                    Some(Ok(WsMessage::Text(text))) => remote.send(text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => remote.send(data),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%tunnel_id, error = %e, "Local peer error");
                        break;
                    }
                    // Ping/Pong handled by tungstenite
                    Some(Ok(_)) => continue,
                };
                if let Err(e) = forwarded {
                    debug!(%tunnel_id, error = %e, "Dropped local message");
                }
            }

            // Remote → local peer
            message = inbound.recv() => {
                let outgoing = match message {
                    Ok(Message::Text(text)) => WsMessage::text(text),
                    Ok(Message::Binary(data)) => WsMessage::binary(data),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%tunnel_id, skipped, "Local peer lagging; messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if ws_write.send(outgoing).await.is_err() {
                    break;
                }
            }

            _ = shutdown.changed() => {
                let _ = ws_write.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    trace!(%tunnel_id, "Local peer finished");
}

/// Completes the server side of a local peer's upgrade.
async fn upgrade(stream: TcpStream) -> Result<WebSocketStream<TcpStream>> {
    Ok(tokio_tungstenite::accept_async(stream).await?)
}

// ============================================================================
// Tests
// ============================================================================
