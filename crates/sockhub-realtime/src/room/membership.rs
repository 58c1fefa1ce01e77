//! Membership tracking: which rooms each connection is in (reverse index).

use std::collections::HashSet;

use dashmap::DashMap;

use crate::connection::handle::ConnectionId;

/// Connection ID → set of room names.
#[derive(Debug, Default)]
pub struct MembershipTracker {
    by_connection: DashMap<ConnectionId, HashSet<String>>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `conn_id` joined `room`.
    pub fn add(&self, conn_id: &str, room: &str) {
        self.by_connection
            .entry(conn_id.to_owned())
            .or_default()
            .insert(room.to_owned());
    }

    /// Records that `conn_id` left `room`. Drops the entry once empty.
    pub fn remove(&self, conn_id: &str, room: &str) {
        if let Some(mut rooms) = self.by_connection.get_mut(conn_id) {
            rooms.remove(room);
        }
        self.by_connection
            .remove_if(conn_id, |_, rooms| rooms.is_empty());
    }

    /// Rooms `conn_id` is in.
    pub fn rooms_of(&self, conn_id: &str) -> HashSet<String> {
        self.by_connection
            .get(conn_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of rooms `conn_id` is in.
    pub fn count(&self, conn_id: &str) -> usize {
        self.by_connection
            .get(conn_id)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    /// Forgets every membership of `conn_id`, returning the rooms it was in.
    pub fn remove_all(&self, conn_id: &str) -> HashSet<String> {
        self.by_connection
            .remove(conn_id)
            .map(|(_, rooms)| rooms)
            .unwrap_or_default()
    }
}
