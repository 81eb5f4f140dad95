//! Event envelope: an event name, the room it targets, and its payload.

use serde_json::Value;

use crate::events::EntityEvent;
use crate::protocol::ServerFrame;
use crate::room::RoomKey;

/// `{ name, targetType, targetId, payload }`.
///
/// Envelopes carry no identity: they are neither deduplicated nor ordered
/// against each other.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    /// Event name.
    pub name: String,
    /// Room the event fans out to.
    pub target: RoomKey,
    /// Event payload.
    pub payload: Value,
}

impl EventEnvelope {
    /// Build an envelope.
    pub fn new(name: impl Into<String>, target: RoomKey, payload: Value) -> Self {
        Self {
            name: name.into(),
            target,
            payload,
        }
    }

    /// Envelope for an entity mutation.
    pub fn entity(event: EntityEvent, target: RoomKey, payload: Value) -> Self {
        Self::new(event.to_string(), target, payload)
    }

    /// Wire frame delivered to room members.
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame {
            event: self.name.clone(),
            data: self.payload.clone(),
            room: Some(self.target.clone()),
        }
    }
}
