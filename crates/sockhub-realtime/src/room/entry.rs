//! Single room with member tracking.

use std::collections::HashSet;

use crate::connection::handle::ConnectionId;

/// A named room and the connections in it.
#[derive(Debug, Clone)]
pub struct RoomEntry {
    /// Room name.
    pub name: String,
    members: HashSet<ConnectionId>,
}

impl RoomEntry {
    /// Creates a room holding a single member.
    pub fn with_member(name: &str, conn_id: &str) -> Self {
        let mut members = HashSet::new();
        members.insert(conn_id.to_owned());
        Self {
            name: name.to_owned(),
            members,
        }
    }

    /// Adds a member. Returns `false` if already present.
    pub fn add(&mut self, conn_id: &str) -> bool {
        self.members.insert(conn_id.to_owned())
    }

    /// Removes a member. Returns `false` if absent.
    pub fn remove(&mut self, conn_id: &str) -> bool {
        self.members.remove(conn_id)
    }

    /// Whether `conn_id` is a member.
    pub fn contains(&self, conn_id: &str) -> bool {
        self.members.contains(conn_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of member ids.
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.iter().cloned().collect()
    }
}
