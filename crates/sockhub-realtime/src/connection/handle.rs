//! Logical connection handle.
//!
//! A [`Connection`] outlives the transports bound to it: when a transport
//! drops, the connection keeps its identifier, rooms and handlers for the
//! reconnection grace period.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Future;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::dispatch::dispatcher::EventDispatcher;
use crate::dispatch::handler::{EventContext, EventHandler, HandlerResult};
use crate::error::{RealtimeError, RealtimeResult};
use crate::frame::{AckId, DEFAULT_NAMESPACE, Frame};
use crate::message::serializer::encode_event;
use crate::message::types::EventPacket;
use crate::message::validator::{validate_event_name, validate_room_name};
use crate::room::handle::Room;
use crate::room::router::BroadcastReport;
use crate::server::EngineShared;

use super::session::{CloseReason, SessionHandle};

/// Stable logical connection identifier.
pub type ConnectionId = String;

/// Generates a fresh identifier: 128 random bits rendered as 32 hex digits.
pub fn generate_id() -> ConnectionId {
    Uuid::new_v4().simple().to_string()
}

/// Callback invoked with the peer's acknowledgment (or the reason none came).
pub type AckCallback = Box<dyn FnOnce(RealtimeResult<Value>) + Send + 'static>;

type DisconnectHook = Box<dyn FnOnce(Connection, DisconnectReason) + Send + 'static>;

/// Lifecycle of a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// A live transport is bound.
    Connected,
    /// No transport; waiting for the client to resume.
    Reconnecting,
    /// Permanently gone.
    Disconnected,
}

/// Why a connection was permanently removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client sent DISCONNECT.
    ClientDisconnect,
    /// The grace period elapsed without a reconnection.
    GraceExpired,
    /// The application called [`Connection::disconnect`].
    ServerDisconnect,
    /// The engine shut down.
    ServerShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientDisconnect => write!(f, "client disconnect"),
            Self::GraceExpired => write!(f, "grace period expired"),
            Self::ServerDisconnect => write!(f, "server disconnect"),
            Self::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}

/// Transport binding of a connection. `generation` increases on every bind.
#[derive(Debug)]
struct TransportSlot {
    session: Option<Weak<SessionHandle>>,
    generation: u64,
    detached_at: Option<Instant>,
}

struct ConnectionInner {
    id: ConnectionId,
    shared: Weak<EngineShared>,
    transport: Mutex<TransportSlot>,
    closed: AtomicBool,
    connected_at: DateTime<Utc>,
    last_heartbeat: Mutex<DateTime<Utc>>,
    dispatcher: EventDispatcher,
    next_ack: AtomicU64,
    pending_acks: Mutex<HashMap<AckId, AckCallback>>,
    disconnect_hooks: Mutex<Vec<DisconnectHook>>,
}

/// A logical client connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        shared: Weak<EngineShared>,
        session: &Arc<SessionHandle>,
        handler_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                shared,
                transport: Mutex::new(TransportSlot {
                    session: Some(Arc::downgrade(session)),
                    generation: 1,
                    detached_at: None,
                }),
                closed: AtomicBool::new(false),
                connected_at: now,
                last_heartbeat: Mutex::new(now),
                dispatcher: EventDispatcher::new(handler_timeout),
                next_ack: AtomicU64::new(0),
                pending_acks: Mutex::new(HashMap::new()),
                disconnect_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Disconnected
        } else if self.transport().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Reconnecting
        }
    }

    /// Whether the connection was permanently removed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The bound transport, if it is alive and not closing.
    pub fn transport(&self) -> Option<Arc<SessionHandle>> {
        let slot = self.slot();
        slot.session
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|session| !session.is_closing())
    }

    /// When the connection was first established.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Last PING or PONG seen from the client.
    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        *self
            .inner
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn touch(&self) {
        let mut last = self
            .inner
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last = Utc::now();
    }

    /// The per-connection handler table.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Registers an async closure for `event` on the default namespace.
    pub fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_namespace(DEFAULT_NAMESPACE, event, handler);
    }

    /// Registers an async closure for `event` on `namespace`.
    pub fn on_namespace<F, Fut>(&self, namespace: &str, event: &str, handler: F)
    where
        F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_handler(namespace, event, handler);
    }

    /// Registers a handler object. Replaces any handler for the same key.
    pub fn on_handler<H: EventHandler + 'static>(&self, namespace: &str, event: &str, handler: H) {
        self.inner
            .dispatcher
            .on(namespace, event, Arc::new(handler));
    }

    /// Registers a callback run once when the connection is permanently removed.
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: FnOnce(Connection, DisconnectReason) + Send + 'static,
    {
        self.inner
            .disconnect_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(hook));
    }

    /// Sends a raw frame through the bound transport.
    pub async fn send_frame(&self, frame: Frame) -> RealtimeResult<()> {
        let session = self.transport().ok_or(RealtimeError::SessionClosed)?;
        session.send(frame).await
    }

    /// Emits `event` on the default namespace.
    pub async fn emit(&self, event: &str, data: Value) -> RealtimeResult<()> {
        self.emit_in(DEFAULT_NAMESPACE, event, data).await
    }

    /// Emits `event` on `namespace`.
    pub async fn emit_in(&self, namespace: &str, event: &str, data: Value) -> RealtimeResult<()> {
        validate_event_name(event)?;
        let payload = encode_event(&EventPacket::new(event, data))?;
        self.send_frame(Frame::message(namespace, payload)).await
    }

    /// Emits `event` on the default namespace and requests an acknowledgment.
    ///
    /// `callback` runs when the peer answers with ACK or ERROR, or with
    /// [`RealtimeError::SessionClosed`] if the connection goes away first.
    pub async fn emit_with_ack<F>(&self, event: &str, data: Value, callback: F) -> RealtimeResult<AckId>
    where
        F: FnOnce(RealtimeResult<Value>) + Send + 'static,
    {
        self.emit_in_with_ack(DEFAULT_NAMESPACE, event, data, callback)
            .await
    }

    /// Emits `event` on `namespace` and requests an acknowledgment.
    pub async fn emit_in_with_ack<F>(
        &self,
        namespace: &str,
        event: &str,
        data: Value,
        callback: F,
    ) -> RealtimeResult<AckId>
    where
        F: FnOnce(RealtimeResult<Value>) + Send + 'static,
    {
        validate_event_name(event)?;
        let payload = encode_event(&EventPacket::new(event, data))?;
        let ack_id = self.next_ack_id();

        self.pending_acks().insert(ack_id, Box::new(callback));
        let frame = Frame::message(namespace, payload).with_ack(Some(ack_id));
        if let Err(err) = self.send_frame(frame).await {
            self.pending_acks().remove(&ack_id);
            return Err(err);
        }
        Ok(ack_id)
    }

    /// Broadcasts `event` to `room`, excluding this connection.
    pub async fn broadcast_to(
        &self,
        room: &str,
        event: &str,
        data: Value,
    ) -> RealtimeResult<BroadcastReport> {
        Room::new(self.shared()?, room)
            .broadcast(event, data, &[self.inner.id.clone()])
            .await
    }

    /// Number of acknowledgments still awaited from the peer.
    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks().len()
    }

    /// Joins `room`. Returns `false` if already a member.
    pub fn join(&self, room: &str) -> RealtimeResult<bool> {
        validate_room_name(room)?;
        if self.is_closed() {
            return Err(RealtimeError::SessionClosed);
        }
        let shared = self.shared()?;
        let joined = shared.router.join(&self.inner.id, room);
        // Finalization may have run `leave_all` between the check and the join.
        if self.is_closed() {
            shared.router.leave(&self.inner.id, room);
            return Err(RealtimeError::SessionClosed);
        }
        Ok(joined)
    }

    /// Leaves `room`. Returns `false` if not a member.
    pub fn leave(&self, room: &str) -> bool {
        self.shared()
            .map(|shared| shared.router.leave(&self.inner.id, room))
            .unwrap_or(false)
    }

    /// Rooms this connection belongs to, sorted.
    pub fn rooms(&self) -> Vec<String> {
        self.shared()
            .map(|shared| {
                shared
                    .router
                    .rooms_of(&self.inner.id)
                    .into_iter()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Permanently disconnects the client.
    ///
    /// A bound transport is sent DISCONNECT and closed; a connection that is
    /// waiting for a reconnection is removed immediately.
    pub fn disconnect(&self) {
        if let Some(session) = self.transport() {
            session.try_enqueue(Frame::disconnect(DEFAULT_NAMESPACE));
            session.close(CloseReason::ServerDisconnect);
        } else if let Ok(shared) = self.shared() {
            shared.disconnect_detached(&self.inner.id, DisconnectReason::ServerDisconnect);
        }
    }

    /// Serializable snapshot.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.inner.id.clone(),
            state: self.state(),
            connected_at: self.inner.connected_at,
            last_heartbeat: self.last_heartbeat(),
            rooms: self.rooms(),
            pending_acks: self.pending_ack_count(),
        }
    }

    fn shared(&self) -> RealtimeResult<Arc<EngineShared>> {
        self.inner
            .shared
            .upgrade()
            .ok_or(RealtimeError::SessionClosed)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, TransportSlot> {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn pending_acks(&self) -> std::sync::MutexGuard<'_, HashMap<AckId, AckCallback>> {
        self.inner
            .pending_acks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn next_ack_id(&self) -> AckId {
        NonZeroU64::MIN.saturating_add(self.inner.next_ack.fetch_add(1, Ordering::Relaxed))
    }

    /// Binds `session`, returning the previously bound live session if any.
    pub(crate) fn attach(&self, session: &Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let mut slot = self.slot();
        let previous = slot
            .session
            .replace(Arc::downgrade(session))
            .and_then(|weak| weak.upgrade())
            .filter(|previous| !Arc::ptr_eq(previous, session));
        slot.generation += 1;
        slot.detached_at = None;
        previous
    }

    /// Unbinds `session` if it is still the bound one.
    ///
    /// Returns the binding generation that was released, or `None` when a
    /// newer transport has already taken over.
    pub(crate) fn detach(&self, session: &SessionHandle) -> Option<u64> {
        let mut slot = self.slot();
        let is_current = slot
            .session
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), session));
        if !is_current {
            return None;
        }
        slot.session = None;
        slot.detached_at = Some(Instant::now());
        Some(slot.generation)
    }

    /// How long the connection has been without a live transport.
    pub(crate) fn detached_for(&self, now: Instant) -> Option<Duration> {
        let slot = self.slot();
        let live = slot
            .session
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|session| !session.is_closing());
        if live {
            return None;
        }
        Some(
            slot.detached_at
                .map_or(Duration::ZERO, |at| now.saturating_duration_since(at)),
        )
    }

    /// Whether the connection is still detached at binding `generation`.
    pub(crate) fn is_detached_at(&self, generation: u64) -> bool {
        let slot = self.slot();
        slot.session.is_none() && slot.generation == generation
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Completes an outstanding acknowledgment. Duplicates are ignored.
    pub(crate) fn resolve_ack(&self, ack_id: AckId, outcome: RealtimeResult<Value>) -> bool {
        let callback = self.pending_acks().remove(&ack_id);
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => {
                debug!(conn_id = %self.inner.id, ack_id = ack_id.get(), "Ignoring acknowledgment for unknown id");
                false
            }
        }
    }

    /// Fails every outstanding acknowledgment with `SessionClosed`.
    pub(crate) fn fail_pending_acks(&self) {
        let pending = std::mem::take(&mut *self.pending_acks());
        for (_, callback) in pending {
            callback(Err(RealtimeError::SessionClosed));
        }
    }

    pub(crate) fn run_disconnect_hooks(&self, reason: DisconnectReason) {
        let hooks: Vec<DisconnectHook> = std::mem::take(
            &mut *self
                .inner
                .disconnect_hooks
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        for hook in hooks {
            hook(self.clone(), reason);
        }
    }
}

/// Snapshot of connection info (serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Connected at
    pub connected_at: DateTime<Utc>,
    /// Last heartbeat from the client
    pub last_heartbeat: DateTime<Utc>,
    /// Joined rooms
    pub rooms: Vec<String>,
    /// Outstanding acknowledgments
    pub pending_acks: usize,
}
