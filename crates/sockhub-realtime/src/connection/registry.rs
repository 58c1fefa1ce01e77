//! Connection registry: logical identity to connection, across reconnects.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::error::{RealtimeError, RealtimeResult};

use super::handle::{Connection, ConnectionId, generate_id};
use super::session::SessionHandle;

/// Outcome of a resume attempt.
#[derive(Debug)]
pub(crate) enum Resume {
    /// The identity was rebound to the new transport.
    Resumed {
        connection: Connection,
        /// Transport that was still bound and must be closed.
        superseded: Option<Arc<SessionHandle>>,
    },
    /// The identity existed but its grace period had run out. It was removed
    /// and must be finalized by the caller.
    Expired(Connection),
    /// No such identity.
    Unknown,
}

/// Thread-safe map of every live or reconnecting connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection under a freshly generated identifier.
    pub(crate) fn insert_new<F>(&self, make: F) -> Connection
    where
        F: FnOnce(ConnectionId) -> Connection,
    {
        loop {
            let id = generate_id();
            if let Entry::Vacant(slot) = self.connections.entry(id.clone()) {
                let connection = make(id);
                slot.insert(connection.clone());
                return connection;
            }
        }
    }

    /// Rebinds `id` to `session` if it is still within `grace`.
    ///
    /// A connection whose transport is still bound is taken over.
    pub(crate) fn try_resume(
        &self,
        id: &str,
        session: &Arc<SessionHandle>,
        grace: Duration,
    ) -> Resume {
        let now = Instant::now();
        let expired = |connection: &Connection| {
            connection.is_closed()
                || connection
                    .detached_for(now)
                    .is_some_and(|elapsed| elapsed > grace)
        };

        if let Some(entry) = self.connections.get(id) {
            let connection = entry.value();
            if !expired(connection) {
                let superseded = connection.attach(session);
                return Resume::Resumed {
                    connection: connection.clone(),
                    superseded,
                };
            }
        } else {
            return Resume::Unknown;
        }

        match self.connections.remove_if(id, |_, connection| expired(connection)) {
            Some((_, connection)) => Resume::Expired(connection),
            None => Resume::Unknown,
        }
    }

    /// Looks up a connection.
    pub fn resolve(&self, id: &str) -> RealtimeResult<Connection> {
        self.connections
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RealtimeError::NotFound(id.to_owned()))
    }

    /// Removes a connection unconditionally.
    pub(crate) fn unbind(&self, id: &str) -> Option<Connection> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    /// Removes a connection only if it is still detached at `generation`.
    ///
    /// A reconnection in the meantime bumps the generation, so a stale grace
    /// timer never removes a resumed connection.
    pub(crate) fn remove_if_detached(&self, id: &str, generation: u64) -> Option<Connection> {
        self.connections
            .remove_if(id, |_, connection| connection.is_detached_at(generation))
            .map(|(_, connection)| connection)
    }

    /// Removes and returns every connection.
    pub(crate) fn drain(&self) -> Vec<Connection> {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.unbind(id)).collect()
    }

    /// Snapshot of all connections.
    pub fn all(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of registered connections, reconnecting ones included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
