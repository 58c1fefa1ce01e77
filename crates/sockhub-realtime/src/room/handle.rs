//! Application-facing room handle.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::connection::handle::ConnectionId;
use crate::error::RealtimeResult;
use crate::frame::{DEFAULT_NAMESPACE, Frame};
use crate::message::serializer::encode_event;
use crate::message::types::EventPacket;
use crate::message::validator::validate_event_name;
use crate::server::EngineShared;

use super::router::BroadcastReport;

/// A named room, as seen from the engine.
///
/// Rooms are global; the namespace only decides which namespace the
/// broadcast frames are stamped with.
#[derive(Clone)]
pub struct Room {
    shared: Arc<EngineShared>,
    name: String,
    namespace: String,
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Room {
    pub(crate) fn new(shared: Arc<EngineShared>, name: &str) -> Self {
        Self {
            shared,
            name: name.to_owned(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }

    /// Stamps broadcasts with `namespace` instead of the default one.
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_owned();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Snapshot of member ids.
    pub fn members(&self) -> Vec<ConnectionId> {
        self.shared.router.members(&self.name)
    }

    pub fn len(&self) -> usize {
        self.shared.router.member_count(&self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emits `event` to every member except those in `except`.
    pub async fn broadcast(
        &self,
        event: &str,
        data: Value,
        except: &[ConnectionId],
    ) -> RealtimeResult<BroadcastReport> {
        validate_event_name(event)?;
        let payload = encode_event(&EventPacket::new(event, data))?;
        let frame = Frame::message(self.namespace.as_str(), payload);
        Ok(self.broadcast_frame(frame, except).await)
    }

    /// Sends a prebuilt frame to every member except those in `except`.
    pub async fn broadcast_frame(&self, frame: Frame, except: &[ConnectionId]) -> BroadcastReport {
        self.shared
            .router
            .broadcast(&self.shared.registry, &self.name, frame, except)
            .await
    }
}
