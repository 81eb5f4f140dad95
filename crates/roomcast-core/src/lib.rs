//! # roomcast-core
//!
//! Shared vocabulary for the roomcast realtime layer.
//!
//! Both the server gateway and the browser-side client session depend on
//! this crate, so everything that crosses the wire lives here:
//!
//! - **Branded IDs**: `ConnectionId`, `UserId`, `TenantId` as newtypes
//! - **Rooms**: `RoomType` and `RoomKey`, the `(roomType, roomId)` identity
//! - **Event catalog**: entity event names, chat and notification events
//! - **Wire frames**: `ClientRequest` (client → server) and `ServerFrame`
//! - **Envelopes**: `EventEnvelope`, an event tagged with its target room
//! - **Notifications**: categories and per-user preferences
//! - **Backoff**: reconnect policy and delay calculation
//! - **Errors**: `RealtimeError` taxonomy and machine-readable codes

#![deny(unsafe_code)]

pub mod backoff;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod notification;
pub mod protocol;
pub mod room;

pub use backoff::ReconnectPolicy;
pub use envelope::EventEnvelope;
pub use errors::RealtimeError;
pub use ids::{ConnectionId, MessageId, NotificationId, RequestId, TenantId, UserId};
pub use protocol::{ClientRequest, ServerFrame};
pub use room::{ChatTarget, RoomKey, RoomType};
