//! Wire frames.
//!
//! Every message is a JSON text frame. Client requests are
//! `{"event": <name>, "data": <payload>}`; server frames add an optional
//! `room` naming the envelope's target so the client can scope handlers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AUTHORIZATION_DENIED, RealtimeError};
use crate::events;
use crate::ids::{RequestId, TenantId, UserId};
use crate::room::{ChatTarget, RoomKey, RoomType};

/// `{ projectId }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    /// Project id.
    pub project_id: String,
}

/// `{ clientId }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRef {
    /// Client id.
    pub client_id: String,
}

/// `{ workspaceId }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRef {
    /// Workspace id.
    pub workspace_id: String,
}

/// `{ targetType, targetId }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTargetRef {
    /// Channel or DM.
    pub target_type: ChatTarget,
    /// Channel or conversation id.
    pub target_id: String,
}

impl ChatTargetRef {
    /// Room of this chat target.
    pub fn room(&self) -> RoomKey {
        self.target_type.room(self.target_id.clone())
    }
}

/// `{ targetType, targetId, body }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendPayload {
    /// Channel or DM.
    pub target_type: ChatTarget,
    /// Channel or conversation id.
    pub target_id: String,
    /// Message text.
    pub body: String,
}

/// Client → server requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    /// `room:join:project`
    #[serde(rename = "room:join:project")]
    JoinProject(ProjectRef),
    /// `room:leave:project`
    #[serde(rename = "room:leave:project")]
    LeaveProject(ProjectRef),
    /// `room:join:client`
    #[serde(rename = "room:join:client")]
    JoinClient(ClientRef),
    /// `room:leave:client`
    #[serde(rename = "room:leave:client")]
    LeaveClient(ClientRef),
    /// `room:join:workspace`
    #[serde(rename = "room:join:workspace")]
    JoinWorkspace(WorkspaceRef),
    /// `room:leave:workspace`
    #[serde(rename = "room:leave:workspace")]
    LeaveWorkspace(WorkspaceRef),
    /// `chat:join`
    #[serde(rename = "chat:join")]
    ChatJoin(ChatTargetRef),
    /// `chat:leave`
    #[serde(rename = "chat:leave")]
    ChatLeave(ChatTargetRef),
    /// `chat:send`
    #[serde(rename = "chat:send")]
    ChatSend(ChatSendPayload),
}

impl ClientRequest {
    /// Join request for a room.
    ///
    /// `None` for `userNotification` rooms, which the server joins on
    /// connect and which have no client-initiated join event.
    pub fn join(room: &RoomKey) -> Option<Self> {
        let id = room.id.clone();
        match room.room_type {
            RoomType::Project => Some(Self::JoinProject(ProjectRef { project_id: id })),
            RoomType::Client => Some(Self::JoinClient(ClientRef { client_id: id })),
            RoomType::Workspace => Some(Self::JoinWorkspace(WorkspaceRef { workspace_id: id })),
            RoomType::ChatChannel | RoomType::ChatDm => Some(Self::ChatJoin(ChatTargetRef {
                target_type: room.room_type.chat_target()?,
                target_id: id,
            })),
            RoomType::UserNotification => None,
        }
    }

    /// Leave request for a room. `None` for `userNotification` rooms.
    pub fn leave(room: &RoomKey) -> Option<Self> {
        let id = room.id.clone();
        match room.room_type {
            RoomType::Project => Some(Self::LeaveProject(ProjectRef { project_id: id })),
            RoomType::Client => Some(Self::LeaveClient(ClientRef { client_id: id })),
            RoomType::Workspace => Some(Self::LeaveWorkspace(WorkspaceRef { workspace_id: id })),
            RoomType::ChatChannel | RoomType::ChatDm => Some(Self::ChatLeave(ChatTargetRef {
                target_type: room.room_type.chat_target()?,
                target_id: id,
            })),
            RoomType::UserNotification => None,
        }
    }

    /// Room this request targets.
    pub fn room(&self) -> RoomKey {
        match self {
            Self::JoinProject(r) | Self::LeaveProject(r) => RoomKey::project(&r.project_id),
            Self::JoinClient(r) | Self::LeaveClient(r) => RoomKey::client(&r.client_id),
            Self::JoinWorkspace(r) | Self::LeaveWorkspace(r) => {
                RoomKey::workspace(&r.workspace_id)
            }
            Self::ChatJoin(r) | Self::ChatLeave(r) => r.room(),
            Self::ChatSend(p) => p.target_type.room(p.target_id.clone()),
        }
    }

    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinProject(_) => events::ROOM_JOIN_PROJECT,
            Self::LeaveProject(_) => events::ROOM_LEAVE_PROJECT,
            Self::JoinClient(_) => events::ROOM_JOIN_CLIENT,
            Self::LeaveClient(_) => events::ROOM_LEAVE_CLIENT,
            Self::JoinWorkspace(_) => events::ROOM_JOIN_WORKSPACE,
            Self::LeaveWorkspace(_) => events::ROOM_LEAVE_WORKSPACE,
            Self::ChatJoin(_) => events::CHAT_JOIN,
            Self::ChatLeave(_) => events::CHAT_LEAVE,
            Self::ChatSend(_) => events::CHAT_SEND,
        }
    }

    /// Whether this is one of the join requests.
    pub fn is_join(&self) -> bool {
        matches!(
            self,
            Self::JoinProject(_) | Self::JoinClient(_) | Self::JoinWorkspace(_) | Self::ChatJoin(_)
        )
    }

    /// Parse a text frame.
    pub fn from_json(text: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(text).map_err(|e| RealtimeError::InvalidFrame {
            message: format!("invalid request: {e}"),
        })
    }
}

/// Server → client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Target room, for room-scoped events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomKey>,
}

impl ServerFrame {
    /// Frame without a room scope.
    pub fn unscoped(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            room: None,
        }
    }

    /// Parse a text frame.
    pub fn from_json(text: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(text).map_err(|e| RealtimeError::InvalidFrame {
            message: format!("invalid frame: {e}"),
        })
    }

    /// Decode the payload into a typed struct.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        serde_json::from_value(self.data.clone()).map_err(|e| RealtimeError::InvalidFrame {
            message: format!("invalid {} payload: {e}", self.event),
        })
    }
}

/// `connection:connected`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// ISO-8601 server time.
    pub server_time: String,
    /// Handshake correlation id.
    pub request_id: RequestId,
    /// Authenticated user, if any.
    pub user_id: Option<UserId>,
    /// Tenant of the user, if any.
    pub tenant_id: Option<TenantId>,
}

impl ConnectedPayload {
    /// Handshake stamped with the current time.
    pub fn now(user_id: Option<UserId>, tenant_id: Option<TenantId>) -> Self {
        Self {
            server_time: iso_timestamp(Utc::now()),
            request_id: RequestId::new(),
            user_id,
            tenant_id,
        }
    }
}

/// `room:error`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomErrorPayload {
    /// Machine-readable code (`AUTHORIZATION_DENIED`, `INVALID_PARAMS`, ...).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Room the failed request targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomKey>,
    /// Event name of the failed request, when it parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

impl RoomErrorPayload {
    /// Payload for an error, scoped to the request's room when known.
    pub fn from_error(err: &RealtimeError, room: Option<RoomKey>) -> Self {
        let room = match err {
            RealtimeError::AuthorizationDenied { room, .. } => Some(room.clone()),
            _ => room,
        };
        Self {
            code: err.code().to_owned(),
            message: err.to_string(),
            room,
            request: None,
        }
    }

    /// Name the request that failed.
    pub fn for_request(mut self, event: &str) -> Self {
        self.request = Some(event.to_owned());
        self
    }

    /// Whether the failure was a denied join.
    pub fn is_join_denial(&self) -> bool {
        self.code == AUTHORIZATION_DENIED
            && self.request.as_deref().is_some_and(events::is_join_request)
    }

    /// Wrap in a frame.
    pub fn into_frame(self) -> ServerFrame {
        ServerFrame::unscoped(
            events::ROOM_ERROR,
            serde_json::to_value(self).unwrap_or_default(),
        )
    }
}

/// `chat:newMessage`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    /// Channel or DM.
    pub target_type: ChatTarget,
    /// Channel or conversation id.
    pub target_id: String,
    /// The message as stored by the chat layer.
    pub message: Value,
}

/// `chat:memberAdded`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAddedPayload {
    /// Channel or DM.
    pub target_type: ChatTarget,
    /// Channel or conversation id.
    pub target_id: String,
    /// User that was added.
    pub user_id: UserId,
    /// Display name of that user.
    pub user_name: String,
    /// Actor that added them.
    pub added_by: Option<UserId>,
}

/// `chat:memberRemoved`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRemovedPayload {
    /// Channel or DM.
    pub target_type: ChatTarget,
    /// Channel or conversation id.
    pub target_id: String,
    /// User that left or was removed.
    pub user_id: UserId,
    /// Display name of that user.
    pub user_name: String,
    /// `null` for a self-initiated leave, the actor otherwise.
    pub removed_by: Option<UserId>,
}

impl MemberRemovedPayload {
    /// Room the member was removed from.
    pub fn room(&self) -> RoomKey {
        self.target_type.room(self.target_id.clone())
    }
}

/// `notification:read` / `notification:deleted`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRefPayload {
    /// Notification id; absent for `notification:allRead`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    /// Owner of the notification.
    pub user_id: UserId,
}

/// Millisecond-precision UTC timestamp (`2026-01-01T00:00:00.000Z`).
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
