//! Loopback peers and a recording delegate for tests.
//!
//! [`TestServer`] speaks the server side of the protocol with this crate's
//! own [`FrameCodec`] so tests can script exact frames, including invalid
//! ones. [`spawn_tungstenite_echo`] runs an independent implementation.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::codec::{Framed, FramedParts};
use url::Url;

use crate::error::Error;
use crate::protocol::{CloseCode, CloseInfo, Frame, FrameCodec, Message, OpCode, close_payload};
use crate::transport::WebSocketDelegate;
use crate::transport::handshake::accept_key;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on any single wait in a test.
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test-writer subscriber honoring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// RecordingDelegate
// ============================================================================

/// Coarse classification of a reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Transport,
    Handshake,
    Protocol(CloseCode),
    Other,
}

impl From<&Error> for Failure {
    fn from(error: &Error) -> Self {
        if let Some(code) = error.close_code() {
            Self::Protocol(code)
        } else if error.is_handshake_error() {
            Self::Handshake
        } else if error.is_transport_error() {
            Self::Transport
        } else {
            Self::Other
        }
    }
}

/// A delegate callback as observed by [`RecordingDelegate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Open,
    Message(Message),
    Pong(Bytes),
    Failed(Failure),
    Closed(CloseCode, String, bool),
}

/// Forwards every callback into a channel.
pub(crate) struct RecordingDelegate {
    tx: mpsc::UnboundedSender<Recorded>,
}

impl RecordingDelegate {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn record(&self, event: Recorded) {
        let _ = self.tx.send(event);
    }
}

impl WebSocketDelegate for RecordingDelegate {
    fn did_open(&self) {
        self.record(Recorded::Open);
    }

    fn did_receive_message(&self, message: Message) {
        self.record(Recorded::Message(message));
    }

    fn did_receive_pong(&self, payload: Bytes) {
        self.record(Recorded::Pong(payload));
    }

    fn did_fail_with_error(&self, error: Error) {
        self.record(Recorded::Failed(Failure::from(&error)));
    }

    fn did_close(&self, code: CloseCode, reason: &str, was_clean: bool) {
        self.record(Recorded::Closed(code, reason.to_owned(), was_clean));
    }
}

/// Waits for the next recorded callback.
pub(crate) async fn next_event(events: &mut mpsc::UnboundedReceiver<Recorded>) -> Recorded {
    timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a delegate callback")
        .expect("delegate channel closed")
}

/// Asserts that no callback arrives within `window`.
pub(crate) async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<Recorded>, window: Duration) {
    if let Ok(Some(event)) = timeout(window, events.recv()).await {
        panic!("unexpected delegate callback: {event:?}");
    }
}

// ============================================================================
// TestServer
// ============================================================================

/// How the server answers the upgrade request.
#[derive(Debug, Default)]
pub(crate) struct Reply {
    /// Status code; 101 when unset.
    pub status: Option<u16>,
    /// Sub-protocol to echo back.
    pub protocol: Option<String>,
    /// Flip one character of `Sec-WebSocket-Accept`.
    pub corrupt_accept: bool,
    /// Raw bytes written right after the response headers.
    pub trailing: Vec<u8>,
}

/// Loopback listener accepting one client per [`accept`](Self::accept).
pub(crate) struct TestServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TestServer {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        Self { listener, addr }
    }

    pub(crate) fn url(&self, path: &str) -> Url {
        Url::parse(&format!("ws://{}{path}", self.addr)).expect("url")
    }

    pub(crate) async fn accept(&self) -> ServerConn {
        self.accept_with(Reply::default()).await
    }

    /// Accepts one TCP client and answers its upgrade per `reply`.
    pub(crate) async fn accept_with(&self, reply: Reply) -> ServerConn {
        let (mut stream, _) = timeout(TEST_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for a client")
            .expect("accept");

        let mut buf = BytesMut::with_capacity(1024);
        let (target, headers) = loop {
            let read = timeout(TEST_TIMEOUT, stream.read_buf(&mut buf))
                .await
                .expect("timed out reading upgrade request")
                .expect("read");
            assert!(read > 0, "client closed during handshake");

            let mut slots = [httparse::EMPTY_HEADER; 32];
            let mut request = httparse::Request::new(&mut slots);
            if let httparse::Status::Complete(consumed) = request.parse(&buf).expect("parse") {
                let target = request.path.unwrap_or("/").to_owned();
                let headers: Vec<(String, String)> = request
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_owned(),
                            String::from_utf8_lossy(h.value).into_owned(),
                        )
                    })
                    .collect();
                buf.advance(consumed);
                break (target, headers);
            }
        };

        let key = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("sec-websocket-key"))
            .map(|(_, value)| value.clone())
            .expect("Sec-WebSocket-Key");

        let status = reply.status.unwrap_or(101);
        let mut response = if status == 101 {
            let mut accept = accept_key(&key);
            if reply.corrupt_accept {
                let first = if accept.starts_with('A') { "B" } else { "A" };
                accept.replace_range(0..1, first);
            }
            format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {accept}\r\n"
            )
        } else {
            format!("HTTP/1.1 {status} Rejected\r\nContent-Length: 0\r\n")
        };
        if let Some(protocol) = &reply.protocol {
            response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        response.push_str("\r\n");

        let mut out = response.into_bytes();
        out.extend_from_slice(&reply.trailing);
        stream.write_all(&out).await.expect("write response");

        let mut parts = FramedParts::new::<Frame>(stream, FrameCodec::server(16 << 20));
        parts.read_buf = buf;

        ServerConn {
            framed: Framed::from_parts(parts),
            target,
            headers,
        }
    }
}

// ============================================================================
// ServerConn
// ============================================================================

/// Server end of one upgraded connection.
pub(crate) struct ServerConn {
    pub framed: Framed<TcpStream, FrameCodec>,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl ServerConn {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Next frame from the client, or `None` once the client is gone.
    pub(crate) async fn next(&mut self) -> Option<Frame> {
        match timeout(TEST_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            Ok(Some(Err(_)) | None) => None,
            Err(_) => panic!("timed out waiting for a client frame"),
        }
    }

    pub(crate) async fn recv(&mut self) -> Frame {
        self.next().await.expect("client closed the connection")
    }

    pub(crate) async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("send frame");
    }

    pub(crate) async fn send_close(&mut self, code: CloseCode, reason: &str) {
        self.send(Frame::close(close_payload(code, reason))).await;
    }

    /// Writes bytes directly to the socket, bypassing the codec.
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.expect("write raw");
        stream.flush().await.expect("flush raw");
    }

    /// Answers pings, echoes data and close frames until the client leaves.
    pub(crate) async fn echo(mut self) {
        while let Some(frame) = self.next().await {
            match frame.opcode {
                OpCode::Ping => self.send(Frame::pong(frame.payload)).await,
                OpCode::Pong => {}
                OpCode::Close => {
                    let info = CloseInfo::from_payload(&frame.payload).expect("close payload");
                    self.send_close(info.code, &info.reason).await;
                    break;
                }
                _ => self.send(frame).await,
            }
        }
    }
}

/// Accepts one client on `server` and echoes everything it sends.
pub(crate) fn spawn_echo(server: TestServer) -> JoinHandle<()> {
    tokio::spawn(async move {
        let conn = server.accept().await;
        conn.echo().await;
    })
}

// ============================================================================
// Independent Peer
// ============================================================================

/// Runs a tokio-tungstenite echo server; returns its `ws://` URL.
pub(crate) async fn spawn_tungstenite_echo() -> (Url, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let url = Url::parse(&format!("ws://{addr}/echo")).expect("url");

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        WsMessage::Text(_) | WsMessage::Binary(_) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                        // Close replies are queued by tungstenite and
                        // flushed by the next poll.
                        _ => {}
                    }
                }
            });
        }
    });

    (url, handle)
}
