//! Emit API for the CRUD layer.
//!
//! Every committed mutation calls exactly one method here; the hub turns it
//! into an envelope for the affected room and fans it out.

use std::sync::Arc;

use roomcast_core::events::{CHAT_MEMBER_ADDED, CHAT_MEMBER_REMOVED, EntityEvent};
use roomcast_core::protocol::{MemberAddedPayload, MemberRemovedPayload};
use roomcast_core::{EventEnvelope, RoomKey};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::notify::NotificationService;
use crate::websocket::registry::{BroadcastReport, RoomRegistry};

/// Server-side event fan-out entry point.
#[derive(Clone, Debug)]
pub struct RealtimeHub {
    registry: Arc<RoomRegistry>,
    notifications: NotificationService,
}

impl RealtimeHub {
    /// Hub over the gateway's registry.
    pub fn new(registry: Arc<RoomRegistry>, notifications: NotificationService) -> Self {
        Self {
            registry,
            notifications,
        }
    }

    /// Fan an envelope out to its target room.
    pub fn emit(&self, envelope: &EventEnvelope) -> BroadcastReport {
        self.registry.broadcast(envelope)
    }

    /// `{entity}:{action}` for a mutation scoped to `scope`.
    ///
    /// The payload should carry the owning scope id (`projectId`, ...) so
    /// clients can find the list to invalidate.
    pub fn entity_changed(&self, event: EntityEvent, scope: RoomKey, payload: Value) -> BroadcastReport {
        self.emit(&EventEnvelope::entity(event, scope, payload))
    }

    /// A user joined a chat.
    pub fn chat_member_added(&self, payload: &MemberAddedPayload) -> BroadcastReport {
        let room = payload.target_type.room(payload.target_id.clone());
        self.emit(&envelope(CHAT_MEMBER_ADDED, room, payload))
    }

    /// A user left or was removed from a chat.
    ///
    /// Remaining members, the removed user included, get the event first.
    /// Then each of the removed user's connections loses its membership, so
    /// nothing sent afterwards reaches them.
    pub fn chat_member_removed(&self, payload: &MemberRemovedPayload) -> BroadcastReport {
        let room = payload.room();
        let report = self.emit(&envelope(CHAT_MEMBER_REMOVED, room.clone(), payload));
        let revoked = self.registry.revoke_user(&room, &payload.user_id);
        info!(
            room = %room,
            user_id = %payload.user_id,
            removed_by = ?payload.removed_by,
            revoked,
            "chat member removed"
        );
        report
    }

    /// Notification fan-out.
    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}

fn envelope<T: Serialize>(name: &str, room: RoomKey, payload: &T) -> EventEnvelope {
    let value = serde_json::to_value(payload).unwrap_or_else(|e| {
        debug!(event = name, error = %e, "payload serialization failed");
        Value::Null
    });
    EventEnvelope::new(name, room, value)
}
