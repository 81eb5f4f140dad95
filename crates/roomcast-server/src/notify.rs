//! Notification fan-out and preference filter.
//!
//! Each user has one implicit room, `userNotification:{userId}`. A new
//! notification is pushed there only when the user's in-app preference for
//! its category allows it; email is gated separately and runs on its own
//! task so it can never hold up or fail the push.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use roomcast_core::events::{
    NOTIFICATION_ALL_READ, NOTIFICATION_DELETED, NOTIFICATION_NEW, NOTIFICATION_READ,
};
use roomcast_core::notification::{Notification, NotificationCategory, NotificationPreference};
use roomcast_core::protocol::NotificationRefPayload;
use roomcast_core::{EventEnvelope, NotificationId, RealtimeError, RoomKey, UserId};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::{NOTIFICATION_EMAIL_FAILURES_TOTAL, NOTIFICATIONS_TOTAL};
use crate::websocket::registry::{BroadcastReport, RoomRegistry};

/// Per-user notification preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Stored preference; `None` when the user never changed it.
    async fn get(&self, user: &UserId, category: NotificationCategory)
    -> Option<NotificationPreference>;

    /// Replace a preference.
    async fn set(
        &self,
        user: &UserId,
        category: NotificationCategory,
        preference: NotificationPreference,
    ) -> Result<(), RealtimeError>;
}

/// Outbound email channel.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send `notification` to its recipient.
    async fn send(&self, notification: &Notification) -> Result<(), RealtimeError>;
}

/// Preferences held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    rows: RwLock<HashMap<(UserId, NotificationCategory), NotificationPreference>>,
}

impl InMemoryPreferences {
    /// Empty store; every lookup falls back to the default.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferences {
    async fn get(
        &self,
        user: &UserId,
        category: NotificationCategory,
    ) -> Option<NotificationPreference> {
        self.rows.read().get(&(user.clone(), category)).copied()
    }

    async fn set(
        &self,
        user: &UserId,
        category: NotificationCategory,
        preference: NotificationPreference,
    ) -> Result<(), RealtimeError> {
        let _ = self.rows.write().insert((user.clone(), category), preference);
        Ok(())
    }
}

/// Email sender that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, notification: &Notification) -> Result<(), RealtimeError> {
        debug!(
            user_id = %notification.user_id,
            notification_id = %notification.id,
            kind = %notification.event_type,
            "email delivery skipped (no mailer configured)"
        );
        Ok(())
    }
}

/// What `notify` did.
#[derive(Debug)]
pub struct NotifyOutcome {
    /// The notification record.
    pub notification: Notification,
    /// Whether `notification:new` was pushed.
    pub pushed: bool,
    /// Email task, when email is enabled.
    pub email_task: Option<JoinHandle<()>>,
}

/// Notification fan-out.
#[derive(Clone)]
pub struct NotificationService {
    registry: Arc<RoomRegistry>,
    preferences: Arc<dyn PreferenceStore>,
    email: Arc<dyn EmailSender>,
}

impl NotificationService {
    /// Service over the gateway's registry.
    pub fn new(
        registry: Arc<RoomRegistry>,
        preferences: Arc<dyn PreferenceStore>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            registry,
            preferences,
            email,
        }
    }

    /// Effective preference, defaulting to both channels on.
    pub async fn preference(
        &self,
        user: &UserId,
        category: NotificationCategory,
    ) -> NotificationPreference {
        self.preferences
            .get(user, category)
            .await
            .unwrap_or_default()
    }

    /// Change a preference.
    pub async fn update_preference(
        &self,
        user: &UserId,
        category: NotificationCategory,
        preference: NotificationPreference,
    ) -> Result<(), RealtimeError> {
        self.preferences.set(user, category, preference).await?;
        debug!(user_id = %user, category = %category, ?preference, "notification preference updated");
        Ok(())
    }

    /// Create a notification and deliver it per the user's preference.
    ///
    /// Must be called within a Tokio runtime; the email goes out on a
    /// spawned task whose failure is logged and swallowed.
    pub async fn notify(
        &self,
        user: &UserId,
        category: NotificationCategory,
        payload: Value,
    ) -> NotifyOutcome {
        let notification = Notification::new(user.clone(), category, payload);
        let preference = self.preference(user, category).await;

        let pushed = if preference.in_app_enabled {
            let envelope = EventEnvelope::new(
                NOTIFICATION_NEW,
                RoomKey::user_notification(user),
                json!({ "notification": notification }),
            );
            let _ = self.registry.broadcast(&envelope);
            true
        } else {
            debug!(user_id = %user, category = %category, "in-app push suppressed by preference");
            false
        };
        counter!(
            NOTIFICATIONS_TOTAL,
            "category" => category.event_type(),
            "pushed" => if pushed { "true" } else { "false" }
        )
        .increment(1);

        let email_task = preference.email_enabled.then(|| {
            let email = Arc::clone(&self.email);
            let record = notification.clone();
            tokio::spawn(async move {
                if let Err(e) = email.send(&record).await {
                    warn!(
                        user_id = %record.user_id,
                        notification_id = %record.id,
                        error = %e,
                        "notification email failed"
                    );
                    counter!(NOTIFICATION_EMAIL_FAILURES_TOTAL).increment(1);
                }
            })
        });

        NotifyOutcome {
            notification,
            pushed,
            email_task,
        }
    }

    /// Broadcast that one notification was read.
    pub fn mark_read(&self, user: &UserId, notification_id: &NotificationId) -> BroadcastReport {
        self.publish(NOTIFICATION_READ, user, Some(notification_id))
    }

    /// Broadcast that every notification was read.
    pub fn mark_all_read(&self, user: &UserId) -> BroadcastReport {
        self.publish(NOTIFICATION_ALL_READ, user, None)
    }

    /// Broadcast that a notification was deleted.
    pub fn delete(&self, user: &UserId, notification_id: &NotificationId) -> BroadcastReport {
        self.publish(NOTIFICATION_DELETED, user, Some(notification_id))
    }

    fn publish(
        &self,
        event: &str,
        user: &UserId,
        notification_id: Option<&NotificationId>,
    ) -> BroadcastReport {
        let payload = NotificationRefPayload {
            notification_id: notification_id.map(ToString::to_string),
            user_id: user.clone(),
        };
        let envelope = EventEnvelope::new(
            event,
            RoomKey::user_notification(user),
            serde_json::to_value(payload).unwrap_or_default(),
        );
        self.registry.broadcast(&envelope)
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService").finish_non_exhaustive()
    }
}
