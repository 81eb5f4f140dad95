//! Room identity.
//!
//! A room is a broadcast scope named by `(roomType, roomId)`. Rooms are not
//! persisted; the server registry creates them on first join and drops them
//! when the last member leaves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RealtimeError;
use crate::ids::UserId;

/// Hierarchy a room belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomType {
    /// Workspace-wide events (tenant dashboard).
    Workspace,
    /// Project board: sections, tasks, subtasks, attachments, time entries.
    Project,
    /// Client record and its contacts.
    Client,
    /// Chat channel.
    ChatChannel,
    /// Direct-message conversation.
    ChatDm,
    /// Per-user notification stream, joined implicitly on connect.
    UserNotification,
}

impl RoomType {
    /// Every room type, in wire order.
    pub const ALL: [Self; 6] = [
        Self::Workspace,
        Self::Project,
        Self::Client,
        Self::ChatChannel,
        Self::ChatDm,
        Self::UserNotification,
    ];

    /// Wire string (`chatChannel`, `userNotification`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Project => "project",
            Self::Client => "client",
            Self::ChatChannel => "chatChannel",
            Self::ChatDm => "chatDm",
            Self::UserNotification => "userNotification",
        }
    }

    /// Whether joining requires membership in the underlying chat entity.
    pub fn is_chat(self) -> bool {
        matches!(self, Self::ChatChannel | Self::ChatDm)
    }

    /// Chat target for chat rooms.
    pub fn chat_target(self) -> Option<ChatTarget> {
        match self {
            Self::ChatChannel => Some(ChatTarget::Channel),
            Self::ChatDm => Some(ChatTarget::Dm),
            _ => None,
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomType {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RealtimeError::InvalidFrame {
                message: format!("unknown room type: {s}"),
            })
    }
}

/// `targetType` of the chat wire events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTarget {
    /// Named channel.
    Channel,
    /// Direct message.
    Dm,
}

impl ChatTarget {
    /// Room type a chat target lives in.
    pub fn room_type(self) -> RoomType {
        match self {
            Self::Channel => RoomType::ChatChannel,
            Self::Dm => RoomType::ChatDm,
        }
    }

    /// Room for a chat target id.
    pub fn room(self, target_id: impl Into<String>) -> RoomKey {
        RoomKey::new(self.room_type(), target_id)
    }
}

/// Identity of a room: `(roomType, roomId)`.
///
/// Serializes as `{"type": "...", "id": "..."}`; the canonical string form is
/// `"{type}:{id}"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomKey {
    /// Room hierarchy.
    #[serde(rename = "type")]
    pub room_type: RoomType,
    /// Entity id within the hierarchy.
    pub id: String,
}

impl RoomKey {
    /// Build a room key.
    pub fn new(room_type: RoomType, id: impl Into<String>) -> Self {
        Self {
            room_type,
            id: id.into(),
        }
    }

    /// `workspace:{id}`
    pub fn workspace(id: impl Into<String>) -> Self {
        Self::new(RoomType::Workspace, id)
    }

    /// `project:{id}`
    pub fn project(id: impl Into<String>) -> Self {
        Self::new(RoomType::Project, id)
    }

    /// `client:{id}`
    pub fn client(id: impl Into<String>) -> Self {
        Self::new(RoomType::Client, id)
    }

    /// `chatChannel:{id}`
    pub fn chat_channel(id: impl Into<String>) -> Self {
        Self::new(RoomType::ChatChannel, id)
    }

    /// `chatDm:{id}`
    pub fn chat_dm(id: impl Into<String>) -> Self {
        Self::new(RoomType::ChatDm, id)
    }

    /// The implicit notification room of a user.
    pub fn user_notification(user_id: &UserId) -> Self {
        Self::new(RoomType::UserNotification, user_id.as_str())
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_type, self.id)
    }
}

impl FromStr for RoomKey {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or_else(|| RealtimeError::InvalidFrame {
            message: format!("room must be <type>:<id>, got {s}"),
        })?;
        if id.is_empty() {
            return Err(RealtimeError::InvalidFrame {
                message: format!("room id is empty: {s}"),
            });
        }
        Ok(Self::new(kind.parse()?, id))
    }
}
