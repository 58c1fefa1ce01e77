//! Transport session: one live bidirectional byte stream.
//!
//! Each session runs a reader task (this module's [`run_session`]) and a
//! writer task that owns the sink. Outbound frames go through a bounded
//! queue so a slow peer applies backpressure to senders.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RealtimeError, RealtimeResult};
use crate::frame::{CodecError, DEFAULT_NAMESPACE, DecodeError, Frame, FrameType};
use crate::message::serializer::{
    decode_connect_request, decode_error, decode_value, encode_error, encode_handshake,
};
use crate::message::types::{ErrorPayload, Handshake};
use crate::server::EngineShared;

use super::handle::Connection;
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};

/// One item of an inbound frame stream.
///
/// The inner `Err` is a frame that could not be decoded and is dropped; the
/// outer `Err` ends the stream.
pub type InboundItem = Result<Result<Frame, DecodeError>, CodecError>;

/// Transport session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Waiting for the client's CONNECT.
    Connecting = 0,
    /// Handshake done; frames flow both ways.
    Open = 1,
    /// Flushing queued frames; new sends are refused.
    Closing = 2,
    /// Transport released.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client sent DISCONNECT.
    ClientDisconnect,
    /// Two PONGs in a row were missed.
    HeartbeatTimeout,
    /// The peer closed the stream.
    TransportClosed,
    /// Reading or writing the stream failed.
    TransportError,
    /// The peer violated the framing rules.
    ProtocolError,
    /// A newer transport resumed the same connection.
    Superseded,
    /// The application disconnected the client.
    ServerDisconnect,
    /// The engine is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Whether the logical connection ends with this session.
    ///
    /// All other reasons leave the connection waiting for a reconnection.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::ClientDisconnect | Self::ServerDisconnect | Self::ServerShutdown
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ClientDisconnect => "client disconnect",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::TransportClosed => "transport closed",
            Self::TransportError => "transport error",
            Self::ProtocolError => "protocol error",
            Self::Superseded => "superseded",
            Self::ServerDisconnect => "server disconnect",
            Self::ServerShutdown => "server shutdown",
        };
        f.write_str(text)
    }
}

/// Handle to a live transport session.
///
/// Connections hold it weakly; the session task owns the only strong
/// references, so a dropped transport is never kept alive by a connection.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    state: AtomicU8,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    send_timeout: Duration,
}

impl SessionHandle {
    pub(crate) fn new(outbound: mpsc::Sender<Frame>, send_timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            outbound,
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
            send_timeout,
        }
    }

    /// Transport identifier (distinct from the logical connection id).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the session refuses new sends.
    pub fn is_closing(&self) -> bool {
        self.state() >= SessionState::Closing
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Queues a frame for writing.
    ///
    /// Fails with [`RealtimeError::SessionClosed`] once the session is
    /// closing and with [`RealtimeError::Timeout`] when the queue stays full
    /// past the send deadline.
    pub async fn send(&self, frame: Frame) -> RealtimeResult<()> {
        if self.is_closing() {
            return Err(RealtimeError::SessionClosed);
        }
        match time::timeout(self.send_timeout, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RealtimeError::SessionClosed),
            Err(_) => Err(RealtimeError::Timeout {
                operation: "send",
                elapsed: self.send_timeout,
            }),
        }
    }

    /// Queues a control frame without waiting. Returns `false` if the queue is full or gone.
    pub(crate) fn try_enqueue(&self, frame: Frame) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Asks the session to stop. The first reason given wins.
    ///
    /// The session refuses new sends as soon as this returns; frames already
    /// queued are still flushed.
    pub fn close(&self, reason: CloseReason) {
        let closing = SessionState::Closing as u8;
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                (state < closing).then_some(closing)
            });
        {
            let mut current = self
                .close_reason
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            current.get_or_insert(reason);
        }
        self.cancel.cancel();
    }

    pub(crate) fn close_reason(&self) -> CloseReason {
        self.close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or(CloseReason::TransportClosed)
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Drives one transport from handshake to close.
pub(crate) async fn run_session<Si, St>(shared: Arc<EngineShared>, sink: Si, mut stream: St)
where
    Si: Sink<Frame> + Unpin + Send + 'static,
    Si::Error: fmt::Display + Send,
    St: Stream<Item = InboundItem> + Unpin + Send,
{
    let config = shared.config.clone();
    let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));
    let session = Arc::new(SessionHandle::new(tx, config.send_timeout()));
    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        session.clone(),
        config.send_timeout(),
        config.close_timeout(),
    ));

    let connection = match handshake(&shared, &session, &mut stream).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "Handshake failed");
            let payload = encode_error(&ErrorPayload::new(err.code(), err.to_string()));
            session.try_enqueue(Frame::error(DEFAULT_NAMESPACE, None, payload));
            session.set_state(SessionState::Closing);
            session.close(CloseReason::ProtocolError);
            join_writer(writer, &session).await;
            session.set_state(SessionState::Closed);
            return;
        }
    };

    let mut heartbeat = HeartbeatMonitor::new(HeartbeatConfig {
        ping_interval: config.heartbeat_interval(),
        ping_timeout: config.heartbeat_timeout(),
    });
    let mut ticker = time::interval_at(Instant::now() + heartbeat.interval(), heartbeat.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            _ = session.cancelled() => break session.close_reason(),
            _ = shared.shutdown.cancelled() => break CloseReason::ServerShutdown,
            _ = ticker.tick() => match heartbeat.on_tick(Instant::now()) {
                HeartbeatAction::SendPing => {
                    if !session.try_enqueue(Frame::ping()) {
                        debug!(conn_id = %connection.id(), "Outbound queue full, PING skipped");
                    }
                }
                HeartbeatAction::Wait => {}
                HeartbeatAction::Expired => {
                    warn!(
                        conn_id = %connection.id(),
                        missed = heartbeat.missed(),
                        "Heartbeat expired"
                    );
                    break CloseReason::HeartbeatTimeout;
                }
            },
            item = stream.next() => match item {
                None => break CloseReason::TransportClosed,
                Some(Err(CodecError::Io(e))) => {
                    debug!(conn_id = %connection.id(), error = %e, "Transport read failed");
                    break CloseReason::TransportError;
                }
                Some(Err(CodecError::Fatal(e))) => {
                    warn!(conn_id = %connection.id(), error = %e, "Unrecoverable framing error");
                    let err = RealtimeError::Decode(e);
                    let payload = encode_error(&ErrorPayload::new(err.code(), err.to_string()));
                    session.try_enqueue(Frame::error(DEFAULT_NAMESPACE, None, payload));
                    break CloseReason::ProtocolError;
                }
                Some(Ok(Err(e))) => {
                    warn!(conn_id = %connection.id(), error = %e, "Dropping malformed frame");
                }
                Some(Ok(Ok(frame))) => {
                    if let Some(reason) = handle_frame(&connection, &session, &mut heartbeat, frame).await {
                        break reason;
                    }
                }
            },
        }
    };

    if reason == CloseReason::ServerShutdown {
        session.try_enqueue(Frame::disconnect(DEFAULT_NAMESPACE));
    }
    session.set_state(SessionState::Closing);
    session.close(reason);
    shared.release(&connection, &session, reason);
    join_writer(writer, &session).await;
    session.set_state(SessionState::Closed);

    info!(
        conn_id = %connection.id(),
        session_id = %session.id(),
        reason = %reason,
        "Session closed"
    );
}

/// Waits for the client's CONNECT and binds the session to a connection.
async fn handshake<St>(
    shared: &Arc<EngineShared>,
    session: &Arc<SessionHandle>,
    stream: &mut St,
) -> RealtimeResult<Connection>
where
    St: Stream<Item = InboundItem> + Unpin,
{
    let deadline = shared.config.handshake_timeout();
    let frame = tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => {
            return Err(RealtimeError::Handshake("server is shutting down".into()));
        }
        frame = time::timeout(deadline, first_frame(stream)) => {
            frame.map_err(|_| RealtimeError::Timeout {
                operation: "handshake",
                elapsed: deadline,
            })??
        }
    };

    if frame.frame_type != FrameType::Connect {
        return Err(RealtimeError::Handshake(format!(
            "expected CONNECT, got {}",
            frame.frame_type
        )));
    }
    let request = decode_connect_request(&frame.payload)?;

    let binding = shared.bind(request.sid.as_deref(), session);
    let connection = binding.connection;
    session.set_state(SessionState::Open);

    let reply = Handshake {
        sid: connection.id().to_owned(),
        ping_interval: shared.config.heartbeat_interval_ms,
        ping_timeout: shared.config.heartbeat_timeout_ms,
        max_payload: shared.config.max_frame_bytes,
        resumed: binding.resumed,
    };
    if let Err(err) = session
        .send(Frame::connect(frame.namespace, encode_handshake(&reply)))
        .await
    {
        session.set_state(SessionState::Closing);
        shared.release(&connection, session, CloseReason::TransportError);
        return Err(err);
    }

    info!(
        conn_id = %connection.id(),
        session_id = %session.id(),
        resumed = binding.resumed,
        "Connection established"
    );

    if !binding.resumed {
        shared.run_connection_hooks(&connection);
    }
    Ok(connection)
}

/// Next decodable frame. Malformed frames before CONNECT are skipped.
async fn first_frame<St>(stream: &mut St) -> RealtimeResult<Frame>
where
    St: Stream<Item = InboundItem> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Ok(frame))) => return Ok(frame),
            Some(Ok(Err(e))) => warn!(error = %e, "Dropping malformed frame before handshake"),
            Some(Err(e)) => return Err(RealtimeError::Transport(e.to_string())),
            None => {
                return Err(RealtimeError::Handshake(
                    "transport closed before CONNECT".into(),
                ));
            }
        }
    }
}

/// Handles one inbound frame. Returns a close reason to stop the session.
async fn handle_frame(
    connection: &Connection,
    session: &SessionHandle,
    heartbeat: &mut HeartbeatMonitor,
    frame: Frame,
) -> Option<CloseReason> {
    match frame.frame_type {
        FrameType::Pong => {
            heartbeat.on_pong();
            connection.touch();
        }
        FrameType::Ping => {
            connection.touch();
            if !session.try_enqueue(Frame::pong()) {
                debug!(conn_id = %connection.id(), "Outbound queue full, PONG skipped");
            }
        }
        FrameType::Message => {
            connection
                .dispatcher()
                .dispatch_inbound(connection, frame)
                .await;
        }
        FrameType::Ack => match frame.ack_id {
            Some(ack_id) => {
                connection.resolve_ack(ack_id, decode_value(&frame.payload));
            }
            None => debug!(conn_id = %connection.id(), "Ignoring ACK without id"),
        },
        FrameType::Error => {
            let message = decode_error(&frame.payload)
                .map(|payload| format!("{}: {}", payload.code, payload.message))
                .unwrap_or_else(|_| String::from_utf8_lossy(&frame.payload).into_owned());
            match frame.ack_id {
                Some(ack_id) => {
                    connection.resolve_ack(ack_id, Err(RealtimeError::HandlerFailure(message)));
                }
                None => warn!(conn_id = %connection.id(), error = %message, "Peer reported error"),
            }
        }
        FrameType::Disconnect => return Some(CloseReason::ClientDisconnect),
        FrameType::Connect => {
            debug!(conn_id = %connection.id(), "Ignoring CONNECT on an open session");
        }
        FrameType::Unknown(code) => {
            debug!(conn_id = %connection.id(), code, "Ignoring frame of unknown type");
        }
    }
    None
}

/// Owns the sink. Writes queued frames until cancelled, then flushes what is left.
async fn write_loop<Si>(
    mut sink: Si,
    mut rx: mpsc::Receiver<Frame>,
    session: Arc<SessionHandle>,
    send_timeout: Duration,
    close_timeout: Duration,
) where
    Si: Sink<Frame> + Unpin,
    Si::Error: fmt::Display + Send,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match time::timeout(send_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = %session.id(), error = %e, "Transport write failed");
                session.close(CloseReason::TransportError);
                return;
            }
            Err(_) => {
                warn!(session_id = %session.id(), "Transport write timed out");
                session.close(CloseReason::TransportError);
                return;
            }
        }
    }

    rx.close();
    let flush = async {
        while let Some(frame) = rx.recv().await {
            sink.feed(frame).await?;
        }
        sink.close().await
    };
    match time::timeout(close_timeout, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session_id = %session.id(), error = %e, "Transport close failed"),
        Err(_) => warn!(session_id = %session.id(), "Timed out flushing outbound frames"),
    }
}

async fn join_writer(writer: JoinHandle<()>, session: &SessionHandle) {
    if let Err(e) = writer.await {
        warn!(session_id = %session.id(), error = %e, "Writer task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize, send_timeout: Duration) -> (SessionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SessionHandle::new(tx, send_timeout), rx)
    }

    #[tokio::test]
    async fn test_send_while_open() {
        let (session, mut rx) = handle(4, Duration::from_secs(1));
        session.set_state(SessionState::Open);

        session.send(Frame::ping()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().frame_type, FrameType::Ping);
    }

    #[tokio::test]
    async fn test_send_after_closing_fails() {
        let (session, _rx) = handle(4, Duration::from_secs(1));
        session.set_state(SessionState::Closing);

        assert!(matches!(
            session.send(Frame::ping()).await,
            Err(RealtimeError::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_queue_full() {
        let (session, _rx) = handle(1, Duration::from_millis(100));
        session.set_state(SessionState::Open);
        session.send(Frame::ping()).await.unwrap();

        let err = session.send(Frame::ping()).await.unwrap_err();
        assert!(matches!(err, RealtimeError::Timeout { operation: "send", .. }));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (session, rx) = handle(1, Duration::from_secs(1));
        session.set_state(SessionState::Open);
        drop(rx);

        assert!(matches!(
            session.send(Frame::ping()).await,
            Err(RealtimeError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_refuses_sends_but_flushes_queue() {
        let (session, mut rx) = handle(4, Duration::from_secs(1));
        session.set_state(SessionState::Open);
        assert!(session.try_enqueue(Frame::disconnect(DEFAULT_NAMESPACE)));

        session.close(CloseReason::ServerDisconnect);

        assert_eq!(session.state(), SessionState::Closing);
        assert!(matches!(
            session.send(Frame::message(DEFAULT_NAMESPACE, "late")).await,
            Err(RealtimeError::SessionClosed)
        ));
        assert_eq!(rx.recv().await.unwrap().frame_type, FrameType::Disconnect);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_does_not_reopen_closed_session() {
        let (session, _rx) = handle(1, Duration::from_secs(1));
        session.set_state(SessionState::Closed);
        session.close(CloseReason::TransportError);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (session, _rx) = handle(1, Duration::from_secs(1));
        session.close(CloseReason::Superseded);
        session.close(CloseReason::ServerShutdown);
        assert_eq!(session.close_reason(), CloseReason::Superseded);
    }

    #[test]
    fn test_permanent_reasons() {
        assert!(CloseReason::ClientDisconnect.is_permanent());
        assert!(CloseReason::ServerShutdown.is_permanent());
        assert!(!CloseReason::HeartbeatTimeout.is_permanent());
        assert!(!CloseReason::TransportClosed.is_permanent());
        assert!(!CloseReason::Superseded.is_permanent());
    }
}
