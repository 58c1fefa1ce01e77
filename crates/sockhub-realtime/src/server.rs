//! Top-level real-time engine that ties together all subsystems.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sockhub_core::config::RealtimeConfig;
use sockhub_core::error::AppError;

use crate::connection::handle::{Connection, ConnectionId, DisconnectReason};
use crate::connection::registry::{ConnectionRegistry, Resume};
use crate::connection::session::{CloseReason, InboundItem, SessionHandle, run_session};
use crate::error::RealtimeResult;
use crate::frame::{Frame, FrameCodec};
use crate::room::handle::Room;
use crate::room::router::RoomRouter;

type ConnectionHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Result of binding a transport to a logical connection.
pub(crate) struct Binding {
    pub(crate) connection: Connection,
    pub(crate) resumed: bool,
}

/// State shared by the engine, its sessions and its connections.
pub(crate) struct EngineShared {
    pub(crate) config: RealtimeConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) router: RoomRouter,
    pub(crate) shutdown: CancellationToken,
    hooks: RwLock<Vec<ConnectionHook>>,
    tasks: TaskTracker,
    this: Weak<EngineShared>,
}

impl EngineShared {
    /// Resumes `requested` if possible, otherwise registers a new connection.
    pub(crate) fn bind(&self, requested: Option<&str>, session: &Arc<SessionHandle>) -> Binding {
        if let Some(sid) = requested {
            match self
                .registry
                .try_resume(sid, session, self.config.reconnect_grace())
            {
                Resume::Resumed {
                    connection,
                    superseded,
                } => {
                    if let Some(previous) = superseded {
                        info!(conn_id = %sid, session_id = %previous.id(), "Transport taken over");
                        previous.close(CloseReason::Superseded);
                    }
                    return Binding {
                        connection,
                        resumed: true,
                    };
                }
                Resume::Expired(connection) => {
                    self.finalize(&connection, DisconnectReason::GraceExpired);
                }
                Resume::Unknown => {
                    debug!(conn_id = %sid, "Unknown connection id, issuing a new one");
                }
            }
        }

        let handler_timeout = self.config.handler_timeout();
        let connection = self.registry.insert_new(|id| {
            Connection::new(id, self.this.clone(), session, handler_timeout)
        });
        Binding {
            connection,
            resumed: false,
        }
    }

    /// Unbinds a stopped session from its connection.
    ///
    /// Permanent reasons finalize the connection; anything else starts the
    /// reconnection grace period.
    pub(crate) fn release(&self, connection: &Connection, session: &SessionHandle, reason: CloseReason) {
        let Some(generation) = connection.detach(session) else {
            debug!(conn_id = %connection.id(), "Session superseded, connection stays bound");
            return;
        };

        let permanent = match reason {
            CloseReason::ClientDisconnect => Some(DisconnectReason::ClientDisconnect),
            CloseReason::ServerDisconnect => Some(DisconnectReason::ServerDisconnect),
            CloseReason::ServerShutdown => Some(DisconnectReason::ServerShutdown),
            _ => None,
        };
        match permanent {
            Some(reason) => {
                if let Some(connection) = self.registry.unbind(connection.id()) {
                    self.finalize(&connection, reason);
                }
            }
            None => {
                debug!(
                    conn_id = %connection.id(),
                    reason = %reason,
                    "Transport released, awaiting reconnection"
                );
                self.schedule_expiry(connection.id().to_owned(), generation);
            }
        }
    }

    fn schedule_expiry(&self, id: ConnectionId, generation: u64) {
        let grace = self.config.reconnect_grace();
        let shared = self.this.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = time::sleep(grace) => {}
                _ = shutdown.cancelled() => return,
            }
            if let Some(shared) = shared.upgrade() {
                if let Some(connection) = shared.registry.remove_if_detached(&id, generation) {
                    shared.finalize(&connection, DisconnectReason::GraceExpired);
                }
            }
        });
    }

    /// Removes a connection that has no transport.
    pub(crate) fn disconnect_detached(&self, id: &str, reason: DisconnectReason) {
        if let Some(connection) = self.registry.unbind(id) {
            self.finalize(&connection, reason);
        }
    }

    /// Tears down a connection that has already left the registry.
    fn finalize(&self, connection: &Connection, reason: DisconnectReason) {
        connection.mark_closed();
        let rooms = self.router.leave_all(connection.id());
        connection.fail_pending_acks();
        connection.run_disconnect_hooks(reason);
        info!(
            conn_id = %connection.id(),
            reason = %reason,
            rooms = rooms.len(),
            "Connection disconnected"
        );
    }

    pub(crate) fn run_connection_hooks(&self, connection: &Connection) {
        let hooks: Vec<ConnectionHook> = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook(connection);
        }
    }
}

/// Central real-time engine: accepts transports, owns the registry and the rooms.
#[derive(Clone)]
pub struct RealtimeEngine {
    shared: Arc<EngineShared>,
}

impl fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("connections", &self.shared.registry.len())
            .field("rooms", &self.shared.router.room_count())
            .finish()
    }
}

impl RealtimeEngine {
    /// Creates an engine with no connections.
    pub fn new(config: RealtimeConfig) -> Self {
        let shared = Arc::new_cyclic(|this| EngineShared {
            config,
            registry: ConnectionRegistry::new(),
            router: RoomRouter::new(),
            shutdown: CancellationToken::new(),
            hooks: RwLock::new(Vec::new()),
            tasks: TaskTracker::new(),
            this: this.clone(),
        });

        info!(
            heartbeat_interval_ms = shared.config.heartbeat_interval_ms,
            heartbeat_timeout_ms = shared.config.heartbeat_timeout_ms,
            reconnect_grace_ms = shared.config.reconnect_grace_ms,
            "Real-time engine initialized"
        );
        Self { shared }
    }

    /// Engine configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.shared.config
    }

    /// Registers a callback run for every new (not resumed) connection.
    ///
    /// Runs after the handshake reply is queued and before the first inbound
    /// frame is dispatched, so handlers registered here see every event.
    pub fn on_connection<F>(&self, hook: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.shared
            .hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(hook));
    }

    /// Serves one transport on a background task.
    pub fn accept<Si, St>(&self, sink: Si, stream: St) -> JoinHandle<()>
    where
        Si: Sink<Frame> + Unpin + Send + 'static,
        Si::Error: fmt::Display + Send,
        St: Stream<Item = InboundItem> + Unpin + Send + 'static,
    {
        self.shared
            .tasks
            .spawn(run_session(self.shared.clone(), sink, stream))
    }

    /// Serves one transport on the current task until it closes.
    pub async fn serve<Si, St>(&self, sink: Si, stream: St)
    where
        Si: Sink<Frame> + Unpin + Send + 'static,
        Si::Error: fmt::Display + Send,
        St: Stream<Item = InboundItem> + Unpin + Send,
    {
        self.shared
            .tasks
            .track_future(run_session(self.shared.clone(), sink, stream))
            .await;
    }

    /// Serves a raw byte stream framed with [`FrameCodec`].
    pub fn accept_io<T>(&self, io: T) -> JoinHandle<()>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = FrameCodec::new(self.shared.config.max_frame_bytes);
        let (sink, stream) = Framed::new(io, codec).split();
        self.accept(sink, stream)
    }

    /// Looks up a connection by id.
    pub fn resolve(&self, id: &str) -> RealtimeResult<Connection> {
        self.shared.registry.resolve(id)
    }

    /// Snapshot of every registered connection, reconnecting ones included.
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.registry.all()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Handle to a room. The room need not exist yet.
    pub fn room(&self, name: &str) -> Room {
        Room::new(self.shared.clone(), name)
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.shared.router.room_count()
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Disconnects every client and waits up to `grace` for sessions to finish.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), AppError> {
        info!(
            connections = self.connection_count(),
            "Shutting down real-time engine"
        );

        self.shared.shutdown.cancel();
        self.shared.tasks.close();
        if time::timeout(grace, self.shared.tasks.wait()).await.is_err() {
            warn!(
                remaining = self.shared.tasks.len(),
                "Sessions still running after shutdown grace period"
            );
        }

        for connection in self.shared.registry.drain() {
            self.shared
                .finalize(&connection, DisconnectReason::ServerShutdown);
        }

        info!("Real-time engine shut down");
        Ok(())
    }
}
