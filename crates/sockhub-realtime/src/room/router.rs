//! Room router: room membership and fan-out.

use std::collections::HashSet;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::handle::ConnectionId;
use crate::connection::registry::ConnectionRegistry;
use crate::frame::Frame;

use super::entry::RoomEntry;
use super::membership::MembershipTracker;

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Frames queued on a live transport.
    pub delivered: usize,
    /// Members without a live transport (reconnecting).
    pub skipped: usize,
    /// Members listed in `except`.
    pub excluded: usize,
    /// Members whose send failed or timed out.
    pub failed: usize,
}

/// Registry of all rooms and their members.
///
/// A room exists exactly while it has at least one member.
#[derive(Debug, Default)]
pub struct RoomRouter {
    rooms: DashMap<String, RoomEntry>,
    memberships: MembershipTracker,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn_id` to `room`, creating the room on first join.
    ///
    /// Returns `false` if the connection was already a member.
    pub fn join(&self, conn_id: &str, room: &str) -> bool {
        match self.rooms.entry(room.to_owned()) {
            Entry::Occupied(mut entry) => {
                if !entry.get_mut().add(conn_id) {
                    return false;
                }
                self.memberships.add(conn_id, room);
            }
            Entry::Vacant(slot) => {
                slot.insert(RoomEntry::with_member(room, conn_id));
                self.memberships.add(conn_id, room);
                debug!(room, "Room created");
            }
        }
        true
    }

    /// Removes `conn_id` from `room`, deleting the room once empty.
    ///
    /// Returns `false` if the connection was not a member.
    pub fn leave(&self, conn_id: &str, room: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut entry) => {
                let removed = entry.remove(conn_id);
                if removed {
                    self.memberships.remove(conn_id, room);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.drop_if_empty(room);
        }
        removed
    }

    /// Removes `conn_id` from every room. Returns the rooms it was in.
    pub fn leave_all(&self, conn_id: &str) -> HashSet<String> {
        let rooms = self.memberships.remove_all(conn_id);
        for room in &rooms {
            if let Some(mut entry) = self.rooms.get_mut(room) {
                entry.remove(conn_id);
            }
            self.drop_if_empty(room);
        }
        rooms
    }

    fn drop_if_empty(&self, room: &str) {
        if self
            .rooms
            .remove_if(room, |_, entry| entry.is_empty())
            .is_some()
        {
            debug!(room, "Room removed");
        }
    }

    /// Snapshot of the members of `room`.
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|entry| entry.members())
            .unwrap_or_default()
    }

    /// Whether `conn_id` is in `room`.
    pub fn contains(&self, room: &str, conn_id: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|entry| entry.contains(conn_id))
    }

    /// Rooms `conn_id` is in.
    pub fn rooms_of(&self, conn_id: &str) -> HashSet<String> {
        self.memberships.rooms_of(conn_id)
    }

    /// Number of rooms `conn_id` is in.
    pub fn membership_count(&self, conn_id: &str) -> usize {
        self.memberships.count(conn_id)
    }

    /// Number of members in `room`.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Sends `frame` to every member of `room` not listed in `except`.
    ///
    /// Works on a membership snapshot taken at call time. Members without a
    /// live transport are skipped; one member's failure does not affect the
    /// others.
    pub async fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        room: &str,
        frame: Frame,
        except: &[ConnectionId],
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut sends = Vec::new();

        for conn_id in self.members(room) {
            if except.contains(&conn_id) {
                report.excluded += 1;
                continue;
            }
            let transport = registry
                .resolve(&conn_id)
                .ok()
                .and_then(|connection| connection.transport());
            match transport {
                Some(session) => {
                    let frame = frame.clone();
                    sends.push(async move {
                        let result = session.send(frame).await;
                        (conn_id, result)
                    });
                }
                None => report.skipped += 1,
            }
        }

        for (conn_id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(conn_id = %conn_id, room, error = %e, "Broadcast delivery failed");
                }
            }
        }

        debug!(
            room,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let router = RoomRouter::new();
        assert!(router.join("a", "lobby"));
        assert!(!router.join("a", "lobby"));
        assert!(router.join("b", "lobby"));

        assert_eq!(router.member_count("lobby"), 2);
        assert!(router.contains("lobby", "a"));
        assert_eq!(router.rooms_of("a"), HashSet::from(["lobby".to_string()]));

        assert!(router.leave("a", "lobby"));
        assert!(!router.leave("a", "lobby"));
        assert_eq!(router.members("lobby"), vec!["b".to_string()]);
    }

    #[test]
    fn test_room_removed_when_empty() {
        let router = RoomRouter::new();
        router.join("a", "lobby");
        assert_eq!(router.room_count(), 1);

        router.leave("a", "lobby");
        assert_eq!(router.room_count(), 0);
        assert!(router.members("lobby").is_empty());
    }

    #[test]
    fn test_leave_all() {
        let router = RoomRouter::new();
        router.join("a", "one");
        router.join("a", "two");
        router.join("b", "two");

        let left = router.leave_all("a");
        assert_eq!(left.len(), 2);
        assert_eq!(router.membership_count("a"), 0);
        assert_eq!(router.room_count(), 1);
        assert_eq!(router.members("two"), vec!["b".to_string()]);
    }

    #[test]
    fn test_leave_unknown_room() {
        let router = RoomRouter::new();
        assert!(!router.leave("a", "nowhere"));
        assert!(router.leave_all("a").is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_skips_unknown_and_excluded() {
        let router = RoomRouter::new();
        let registry = ConnectionRegistry::new();
        router.join("ghost", "lobby");
        router.join("me", "lobby");

        let report = router
            .broadcast(&registry, "lobby", Frame::ping(), &["me".to_string()])
            .await;
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 0,
                skipped: 1,
                excluded: 1,
                failed: 0,
            }
        );
    }
}
