//! Event catalog.
//!
//! Every mutation the CRUD layer commits produces exactly one event whose name
//! is listed here. Entity events follow the `{entity}:{action}` scheme.

use std::fmt;

// ── Client → server ─────────────────────────────────────────────────

/// Join a project room.
pub const ROOM_JOIN_PROJECT: &str = "room:join:project";
/// Leave a project room.
pub const ROOM_LEAVE_PROJECT: &str = "room:leave:project";
/// Join a client room.
pub const ROOM_JOIN_CLIENT: &str = "room:join:client";
/// Leave a client room.
pub const ROOM_LEAVE_CLIENT: &str = "room:leave:client";
/// Join a workspace room.
pub const ROOM_JOIN_WORKSPACE: &str = "room:join:workspace";
/// Leave a workspace room.
pub const ROOM_LEAVE_WORKSPACE: &str = "room:leave:workspace";
/// Join a chat channel or DM.
pub const CHAT_JOIN: &str = "chat:join";
/// Leave a chat channel or DM.
pub const CHAT_LEAVE: &str = "chat:leave";
/// Post a chat message.
pub const CHAT_SEND: &str = "chat:send";

/// Whether `name` is one of the join requests.
pub fn is_join_request(name: &str) -> bool {
    matches!(
        name,
        ROOM_JOIN_PROJECT | ROOM_JOIN_CLIENT | ROOM_JOIN_WORKSPACE | CHAT_JOIN
    )
}

// ── Server → client ─────────────────────────────────────────────────

/// Handshake sent once per accepted connection.
pub const CONNECTION_CONNECTED: &str = "connection:connected";
/// A client request was rejected.
pub const ROOM_ERROR: &str = "room:error";
/// New chat message in a channel or DM.
pub const CHAT_NEW_MESSAGE: &str = "chat:newMessage";
/// A user was added to a chat target.
pub const CHAT_MEMBER_ADDED: &str = "chat:memberAdded";
/// A user left or was removed from a chat target.
pub const CHAT_MEMBER_REMOVED: &str = "chat:memberRemoved";
/// New in-app notification.
pub const NOTIFICATION_NEW: &str = "notification:new";
/// One notification marked read.
pub const NOTIFICATION_READ: &str = "notification:read";
/// All notifications marked read.
pub const NOTIFICATION_ALL_READ: &str = "notification:allRead";
/// Notification deleted.
pub const NOTIFICATION_DELETED: &str = "notification:deleted";

/// Notification events, all delivered on `userNotification:{userId}`.
pub const NOTIFICATION_EVENTS: [&str; 4] = [
    NOTIFICATION_NEW,
    NOTIFICATION_READ,
    NOTIFICATION_ALL_READ,
    NOTIFICATION_DELETED,
];

/// Entity kinds that produce `{entity}:{action}` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Project.
    Project,
    /// Board section within a project.
    Section,
    /// Task.
    Task,
    /// Subtask of a task.
    Subtask,
    /// File attached to a task.
    Attachment,
    /// Client (customer) record.
    Client,
    /// Contact person of a client.
    Contact,
    /// Logged time entry.
    TimeEntry,
    /// Running timer.
    Timer,
    /// Personal (non-project) task.
    PersonalTask,
}

impl EntityKind {
    /// Every entity kind.
    pub const ALL: [Self; 10] = [
        Self::Project,
        Self::Section,
        Self::Task,
        Self::Subtask,
        Self::Attachment,
        Self::Client,
        Self::Contact,
        Self::TimeEntry,
        Self::Timer,
        Self::PersonalTask,
    ];

    /// Event-name prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Section => "section",
            Self::Task => "task",
            Self::Subtask => "subtask",
            Self::Attachment => "attachment",
            Self::Client => "client",
            Self::Contact => "contact",
            Self::TimeEntry => "timeEntry",
            Self::Timer => "timer",
            Self::PersonalTask => "personalTask",
        }
    }

    /// Name of the list this entity appears in on the client.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Section => "sections",
            Self::Task => "tasks",
            Self::Subtask => "subtasks",
            Self::Attachment => "attachments",
            Self::Client => "clients",
            Self::Contact => "contacts",
            Self::TimeEntry => "timeEntries",
            Self::Timer => "timers",
            Self::PersonalTask => "personalTasks",
        }
    }

    /// Payload field naming the entity id (`taskId`, `timeEntryId`, ...).
    pub fn id_field(self) -> String {
        format!("{}Id", self.as_str())
    }
}

/// Mutation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityAction {
    /// Created.
    Created,
    /// Updated.
    Updated,
    /// Deleted.
    Deleted,
    /// Moved to another parent (section, project).
    Moved,
    /// Sort order changed.
    Reordered,
}

impl EntityAction {
    /// Every action.
    pub const ALL: [Self; 5] = [
        Self::Created,
        Self::Updated,
        Self::Deleted,
        Self::Moved,
        Self::Reordered,
    ];

    /// Event-name suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
            Self::Reordered => "reordered",
        }
    }
}

/// A parsed `{entity}:{action}` event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityEvent {
    /// Entity.
    pub kind: EntityKind,
    /// Action.
    pub action: EntityAction,
}

impl EntityEvent {
    /// Build an entity event.
    pub fn new(kind: EntityKind, action: EntityAction) -> Self {
        Self { kind, action }
    }

    /// Parse an event name; `None` for anything outside the entity catalog.
    pub fn parse(name: &str) -> Option<Self> {
        let (kind, action) = name.split_once(':')?;
        let kind = EntityKind::ALL.into_iter().find(|k| k.as_str() == kind)?;
        let action = EntityAction::ALL.into_iter().find(|a| a.as_str() == action)?;
        Some(Self { kind, action })
    }

    /// Every entity event name in the catalog.
    pub fn all_names() -> impl Iterator<Item = String> {
        EntityKind::ALL.into_iter().flat_map(|k| {
            EntityAction::ALL
                .into_iter()
                .map(move |a| EntityEvent::new(k, a).to_string())
        })
    }
}

impl fmt::Display for EntityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.action.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_event_names() {
        let ev = EntityEvent::new(EntityKind::TimeEntry, EntityAction::Created);
        assert_eq!(ev.to_string(), "timeEntry:created");
        assert_eq!(
            EntityEvent::new(EntityKind::Task, EntityAction::Reordered).to_string(),
            "task:reordered"
        );
    }

    #[test]
    fn parse_catalog_names() {
        for name in EntityEvent::all_names() {
            let parsed = EntityEvent::parse(&name).unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert_eq!(EntityEvent::all_names().count(), 50);
    }

    #[test]
    fn join_requests_are_recognized() {
        assert!(is_join_request(CHAT_JOIN));
        assert!(is_join_request(ROOM_JOIN_WORKSPACE));
        assert!(!is_join_request(CHAT_SEND));
        assert!(!is_join_request(ROOM_LEAVE_PROJECT));
    }

    #[test]
    fn parse_rejects_non_entity_events() {
        assert!(EntityEvent::parse(CHAT_NEW_MESSAGE).is_none());
        assert!(EntityEvent::parse(NOTIFICATION_NEW).is_none());
        assert!(EntityEvent::parse("task").is_none());
        assert!(EntityEvent::parse("task:exploded").is_none());
    }

    #[test]
    fn id_fields() {
        assert_eq!(EntityKind::Task.id_field(), "taskId");
        assert_eq!(EntityKind::PersonalTask.id_field(), "personalTaskId");
        assert_eq!(EntityKind::TimeEntry.collection(), "timeEntries");
    }
}
