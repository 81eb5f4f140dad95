//! Notification categories, preferences, and the notification record pushed
//! on `notification:new`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NotificationId, UserId};

/// User-configurable notification category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationCategory {
    /// A task was assigned to the user.
    TaskAssigned,
    /// A task the user follows was completed.
    TaskCompleted,
    /// A task is due soon or overdue.
    TaskDue,
    /// The user was @-mentioned.
    Mention,
    /// New comment on something the user follows.
    Comment,
    /// Chat message while the user is away.
    ChatMessage,
    /// Project status or membership change.
    ProjectUpdate,
    /// Client record change.
    ClientUpdate,
}

impl NotificationCategory {
    /// Every category.
    pub const ALL: [Self; 8] = [
        Self::TaskAssigned,
        Self::TaskCompleted,
        Self::TaskDue,
        Self::Mention,
        Self::Comment,
        Self::ChatMessage,
        Self::ProjectUpdate,
        Self::ClientUpdate,
    ];

    /// Notification type string stored by the CRUD layer (`task_assigned`).
    pub fn event_type(self) -> &'static str {
        match self {
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
            Self::TaskDue => "task_due",
            Self::Mention => "mention",
            Self::Comment => "comment",
            Self::ChatMessage => "chat_message",
            Self::ProjectUpdate => "project_update",
            Self::ClientUpdate => "client_update",
        }
    }

    /// Category of a stored notification type string.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.event_type() == event_type)
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Per-user, per-category delivery switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    /// Push `notification:new` to open sessions.
    pub in_app_enabled: bool,
    /// Send an email.
    pub email_enabled: bool,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self {
            in_app_enabled: true,
            email_enabled: true,
        }
    }
}

/// Notification as pushed to the user's room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification id.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    /// Stored type string (`task_assigned`, ...).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Category-specific content (title, entity ids, actor).
    pub payload: Value,
    /// Whether it has been read.
    pub read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// New unread notification.
    pub fn new(user_id: UserId, category: NotificationCategory, payload: Value) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            event_type: category.event_type().to_owned(),
            payload,
            read: false,
            created_at: Utc::now(),
        }
    }
}
