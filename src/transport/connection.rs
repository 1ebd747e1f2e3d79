//! Connection state machine and event loop.
//!
//! One [`ConnectionTask`] owns one socket. It is spawned by
//! [`WebSocket::open`](crate::WebSocket::open) and driven by
//! [`ConnectionCommand`]s sent from any number of handles.
//!
//! # Event Loop
//!
//! While CONNECTING the task races transport setup plus handshake against
//! an incoming `Close`. Once OPEN it selects over:
//!
//! - Inbound frames (data is reassembled, pings are answered at once,
//!   a close frame completes the close handshake)
//! - Commands from handles (send, ping, close)
//! - The close deadline, armed when we send a close frame
//!
//! # Terminal Paths
//!
//! | Cause | State | Delegate |
//! |-------|-------|----------|
//! | Peer close frame | CLOSED | `did_close(code, reason, true)` |
//! | Close timeout, or EOF after our close | CLOSED | `did_close(1006, "", false)` |
//! | `close` while CONNECTING | CLOSED | `did_close(1006, "", false)` |
//! | Transport / handshake failure | CLOSED | `did_fail_with_error` |
//! | Protocol violation | CLOSED, close frame sent | `did_fail_with_error` |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, info, trace, warn};

use crate::client::{ReadyState, SharedState, WebSocketOptions};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{
    CloseCode, CloseInfo, Frame, FrameCodec, Message, MessageAssembler, OpCode, close_payload,
};

use super::delegate::{DelegateEvent, EventDispatcher};
use super::handshake::{self, HandshakeRequest};
use super::stream::{self, MaybeTlsStream};

// ============================================================================
// Types
// ============================================================================

type WsFramed = Framed<MaybeTlsStream, FrameCodec>;
type FrameSink = SplitSink<WsFramed, Frame>;
type FrameStream = SplitStream<WsFramed>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Requests from handles to the event loop.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Send a message, fragmenting as configured.
    Send(Message),
    /// Send a ping with this payload.
    Ping(Bytes),
    /// Start the close handshake, or abort if still connecting.
    Close { code: CloseCode, reason: String },
}

// ============================================================================
// ConnectionTask
// ============================================================================

/// Owner of one connection's socket and state transitions.
pub(crate) struct ConnectionTask {
    id: ConnectionId,
    request: HandshakeRequest,
    options: WebSocketOptions,
    state: Arc<SharedState>,
    events: EventDispatcher,
}

/// Whether the open loop keeps running.
enum Flow {
    Continue,
    Stop,
}

impl ConnectionTask {
    pub(crate) fn new(
        id: ConnectionId,
        request: HandshakeRequest,
        options: WebSocketOptions,
        state: Arc<SharedState>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            id,
            request,
            options,
            state,
            events,
        }
    }

    /// Spawns the event loop on the current runtime.
    pub(crate) fn spawn(
        self,
        commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(commands))
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<ConnectionCommand>) {
        debug!(connection_id = %self.id, url = %self.request.url(), "Connecting");

        let connect_timeout = self.options.connect_timeout;
        let connect = timeout(
            connect_timeout,
            establish(&self.request, self.options.max_message_size),
        );
        tokio::pin!(connect);

        let established = loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ConnectionCommand::Close { .. }) | None => {
                        debug!(connection_id = %self.id, "Handshake aborted");
                        self.finish(CloseInfo::abnormal());
                        return;
                    }
                    Some(other) => {
                        trace!(connection_id = %self.id, ?other, "Ignoring command while connecting");
                    }
                },

                result = &mut connect => break result,
            }
        };

        let outcome = established
            .unwrap_or_else(|_| Err(Error::connection_timeout(connect_timeout.as_millis() as u64)));
        let (framed, protocol) = match outcome {
            Ok(established) => established,
            Err(e) if self.state.transition(ReadyState::Connecting, ReadyState::Closed) => {
                self.fail(e);
                return;
            }
            Err(e) => {
                debug!(connection_id = %self.id, error = %e, "Handshake failed after close");
                self.finish(CloseInfo::abnormal());
                return;
            }
        };

        if let Some(protocol) = protocol {
            self.state.set_protocol(protocol);
        }
        // A handle that closed while connecting has already moved to CLOSED.
        if !self.state.transition(ReadyState::Connecting, ReadyState::Open) {
            debug!(connection_id = %self.id, "Handshake completed after close");
            drop(framed);
            self.finish(CloseInfo::abnormal());
            return;
        }
        info!(
            connection_id = %self.id,
            url = %self.request.url(),
            protocol = self.state.protocol().unwrap_or(""),
            "WebSocket open"
        );
        self.events.emit(DelegateEvent::Open);

        let (sink, stream) = framed.split();
        let mut session = Session {
            task: &self,
            sink,
            assembler: MessageAssembler::new(self.options.max_message_size),
            close_sent: false,
            close_deadline: None,
        };
        session.run(stream, &mut commands).await;

        debug!(connection_id = %self.id, "Event loop terminated");
    }

    /// Moves to CLOSED and reports `info`.
    fn finish(&self, info: CloseInfo) {
        self.state.advance(ReadyState::Closed);
        info!(
            connection_id = %self.id,
            code = %info.code,
            reason = %info.reason,
            was_clean = info.was_clean,
            "WebSocket closed"
        );
        self.events.emit(DelegateEvent::Closed(info));
    }

    /// Moves to CLOSED and reports `error`.
    fn fail(&self, error: Error) {
        self.state.advance(ReadyState::Closed);
        warn!(connection_id = %self.id, error = %error, "WebSocket failed");
        self.events.emit(DelegateEvent::Failed(error));
    }
}

/// Opens the transport and runs the upgrade handshake.
async fn establish(
    request: &HandshakeRequest,
    max_message_size: usize,
) -> Result<(WsFramed, Option<String>)> {
    let mut stream = stream::connect(request.url()).await?;
    let outcome = handshake::perform(&mut stream, request).await?;

    let mut parts = FramedParts::new::<Frame>(stream, FrameCodec::client(max_message_size));
    parts.read_buf = outcome.leftover;

    Ok((Framed::from_parts(parts), outcome.protocol))
}

// ============================================================================
// Session
// ============================================================================

/// Mutable state of an open connection.
struct Session<'a> {
    task: &'a ConnectionTask,
    sink: FrameSink,
    assembler: MessageAssembler,
    close_sent: bool,
    close_deadline: Option<Instant>,
}

impl Session<'_> {
    async fn run(
        &mut self,
        mut stream: FrameStream,
        commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        loop {
            let deadline = self.close_deadline;

            tokio::select! {
                // Inbound frames
                frame = stream.next() => {
                    let flow = match frame {
                        Some(Ok(frame)) => match self.on_frame(frame).await {
                            Ok(flow) => flow,
                            Err(e) => {
                                self.abort(e).await;
                                Flow::Stop
                            }
                        },
                        Some(Err(e)) => {
                            self.abort(e).await;
                            Flow::Stop
                        }
                        None => {
                            self.on_eof();
                            Flow::Stop
                        }
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }

                // Commands from handles
                command = commands.recv(), if !self.close_sent => {
                    let result = match command {
                        Some(command) => self.on_command(command).await,
                        None => {
                            debug!(connection_id = %self.task.id, "All handles dropped");
                            self.start_close(CloseCode::GoingAway, "").await
                        }
                    };
                    if let Err(e) = result {
                        self.abort(e).await;
                        break;
                    }
                }

                // Peer did not answer our close in time
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(connection_id = %self.task.id, "Close handshake timed out");
                    let _ = self.sink.close().await;
                    self.task.finish(CloseInfo::abnormal());
                    break;
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Flow> {
        trace!(
            connection_id = %self.task.id,
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.len(),
            "Frame received"
        );

        match frame.opcode {
            OpCode::Ping => {
                if !self.close_sent {
                    self.sink.send(Frame::pong(frame.payload)).await?;
                }
            }

            OpCode::Pong => self.task.events.emit(DelegateEvent::Pong(frame.payload)),

            OpCode::Close => {
                let info = CloseInfo::from_payload(&frame.payload)?;
                self.task.state.advance(ReadyState::Closing);

                if !self.close_sent {
                    self.close_sent = true;
                    let echo = Frame::close(close_payload(info.code, ""));
                    if let Err(e) = self.sink.send(echo).await {
                        debug!(connection_id = %self.task.id, error = %e, "Close echo failed");
                    }
                }

                let _ = self.sink.close().await;
                self.task.finish(info);
                return Ok(Flow::Stop);
            }

            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Some(message) = self.assembler.push(frame)? {
                    self.task.events.emit(DelegateEvent::Message(message));
                }
            }
        }

        Ok(Flow::Continue)
    }

    async fn on_command(&mut self, command: ConnectionCommand) -> Result<()> {
        match command {
            ConnectionCommand::Send(message) => {
                let frames = message.into_frames(self.task.options.fragment_size);
                trace!(connection_id = %self.task.id, frames = frames.len(), "Sending message");
                for frame in frames {
                    self.sink.feed(frame).await?;
                }
                self.sink.flush().await
            }
            ConnectionCommand::Ping(payload) => self.sink.send(Frame::ping(payload)).await,
            ConnectionCommand::Close { code, reason } => self.start_close(code, &reason).await,
        }
    }

    /// Sends our close frame and arms the close deadline.
    async fn start_close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        self.task.state.advance(ReadyState::Closing);
        self.close_sent = true;
        self.close_deadline = Some(Instant::now() + self.task.options.close_timeout);

        debug!(connection_id = %self.task.id, %code, reason, "Sending close frame");
        self.sink.send(Frame::close(close_payload(code, reason))).await
    }

    fn on_eof(&mut self) {
        if self.close_sent {
            debug!(connection_id = %self.task.id, "Peer dropped the connection while closing");
            self.task.finish(CloseInfo::abnormal());
        } else {
            self.task.fail(Error::transport(
                "connection closed by peer without a close frame",
            ));
        }
    }

    /// Fails the connection, telling the peer why if it broke the protocol.
    async fn abort(&mut self, error: Error) {
        if let Some(code) = error.close_code()
            && !self.close_sent
        {
            self.close_sent = true;
            let frame = Frame::close(close_payload(code, ""));
            if let Err(e) = self.sink.send(frame).await {
                debug!(connection_id = %self.task.id, error = %e, "Failed to send close frame");
            }
        }

        let _ = self.sink.close().await;
        self.task.fail(error);
    }
}

// ============================================================================
// Tests
// ============================================================================
