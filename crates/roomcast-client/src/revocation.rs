//! Access revocation: what happens when the local user loses a chat room.
//!
//! Per room the local user holds, the state machine is
//! `Member -> Removed` on a `chat:memberRemoved` naming that user. The
//! transition runs at [`Priority::High`] so it completes before any other
//! handler sees the event:
//!
//! 1. the room is dropped from the ledger without a leave frame (the server
//!    already purged the membership),
//! 2. if the room is on screen, the selection is cleared and the room list
//!    is invalidated,
//! 3. exactly one dismissible notice is shown.
//!
//! `removedBy` only picks the notice wording.

use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::events;
use roomcast_core::protocol::MemberRemovedPayload;
use roomcast_core::{RealtimeError, RoomKey, ServerFrame, UserId};
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, Priority, Subscription};
use crate::invalidation::{CacheKey, InvalidationDispatcher};
use crate::tracker::RoomTracker;

/// Why the user lost the room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    /// Someone else removed them.
    Removed,
    /// They left themselves (possibly from another tab).
    Left,
}

/// User-facing, dismissible notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Removed or left.
    pub kind: NoticeKind,
    /// The room that was lost.
    pub room: RoomKey,
    /// Actor, for removals.
    pub by: Option<UserId>,
}

impl Notice {
    /// Display text.
    pub fn message(&self) -> String {
        match (self.kind, &self.by) {
            (NoticeKind::Left, _) => format!("You left {}", self.room),
            (NoticeKind::Removed, Some(by)) => format!("You were removed from {} by {by}", self.room),
            (NoticeKind::Removed, None) => format!("You were removed from {}", self.room),
        }
    }
}

/// The UI state the enforcer touches.
pub trait ViewState: Send + Sync {
    /// Room currently on screen.
    fn selected_room(&self) -> Option<RoomKey>;
    /// Deselect whatever is on screen.
    fn clear_selection(&self);
    /// Surface a notice.
    fn show_notice(&self, notice: Notice);
}

/// In-memory [`ViewState`].
#[derive(Debug, Default)]
pub struct LocalView {
    selected: Mutex<Option<RoomKey>>,
    notices: Mutex<Vec<Notice>>,
}

impl LocalView {
    /// Nothing selected, no notices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `room` on screen.
    pub fn select(&self, room: RoomKey) {
        *self.selected.lock() = Some(room);
    }

    /// Notices not yet dismissed.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    /// Dismiss the notice at `index`.
    pub fn dismiss(&self, index: usize) -> Option<Notice> {
        let mut notices = self.notices.lock();
        (index < notices.len()).then(|| notices.remove(index))
    }
}

impl ViewState for LocalView {
    fn selected_room(&self) -> Option<RoomKey> {
        self.selected.lock().clone()
    }

    fn clear_selection(&self) {
        *self.selected.lock() = None;
    }

    fn show_notice(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Applies `chat:memberRemoved` events that name the local user.
pub struct AccessRevocationEnforcer {
    local_user: UserId,
    tracker: Arc<RoomTracker>,
    view: Arc<dyn ViewState>,
    invalidation: InvalidationDispatcher,
}

impl AccessRevocationEnforcer {
    /// Key of the "rooms I belong to" list.
    pub fn room_list_key() -> CacheKey {
        CacheKey::new(["chat", "rooms"])
    }

    /// Enforcer for `local_user`.
    pub fn new(
        local_user: UserId,
        tracker: Arc<RoomTracker>,
        view: Arc<dyn ViewState>,
        invalidation: InvalidationDispatcher,
    ) -> Self {
        Self {
            local_user,
            tracker,
            view,
            invalidation,
        }
    }

    /// Handle a `chat:memberRemoved` frame. Returns whether it applied to
    /// the local user.
    pub fn handle(&self, frame: &ServerFrame) -> Result<bool, RealtimeError> {
        let payload: MemberRemovedPayload = frame.payload()?;
        if payload.user_id != self.local_user {
            return Ok(false);
        }
        let room = payload.room();

        let had_room = self.tracker.force_leave(&room);
        if self.view.selected_room().as_ref() == Some(&room) {
            self.view.clear_selection();
            self.invalidation.invalidate(&Self::room_list_key());
        }

        let kind = match &payload.removed_by {
            Some(by) if *by != self.local_user => NoticeKind::Removed,
            _ => NoticeKind::Left,
        };
        info!(room = %room, kind = ?kind, had_room, "chat access revoked");
        self.view.show_notice(Notice {
            kind,
            room,
            by: payload.removed_by,
        });
        Ok(true)
    }

    /// Register ahead of every normal-priority handler.
    pub fn install(self: &Arc<Self>, dispatcher: &Dispatcher) -> Subscription {
        let this = Arc::clone(self);
        dispatcher.register_with(events::CHAT_MEMBER_REMOVED, None, Priority::High, move |frame| {
            let applied = this.handle(frame)?;
            if !applied {
                debug!("member removal for another user");
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for AccessRevocationEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRevocationEnforcer")
            .field("local_user", &self.local_user)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::{CacheInvalidator, StaleSet};
    use crate::tracker::FrameSink;
    use roomcast_core::{ChatTarget, ClientRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl FrameSink for CountingSink {
        fn send_request(&self, _request: &ClientRequest) -> bool {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct Fixture {
        enforcer: Arc<AccessRevocationEnforcer>,
        tracker: Arc<RoomTracker>,
        view: Arc<LocalView>,
        stale: Arc<StaleSet>,
        sink: Arc<CountingSink>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(CountingSink::default());
        let tracker = Arc::new(RoomTracker::new(Arc::clone(&sink) as Arc<dyn FrameSink>));
        let view = Arc::new(LocalView::new());
        let stale = Arc::new(StaleSet::new());
        let enforcer = Arc::new(AccessRevocationEnforcer::new(
            UserId::from("me"),
            Arc::clone(&tracker),
            Arc::clone(&view) as Arc<dyn ViewState>,
            InvalidationDispatcher::new(Arc::clone(&stale) as Arc<dyn CacheInvalidator>),
        ));
        Fixture {
            enforcer,
            tracker,
            view,
            stale,
            sink,
        }
    }

    fn removed(user: &str, by: Option<&str>) -> ServerFrame {
        let payload = MemberRemovedPayload {
            target_type: ChatTarget::Channel,
            target_id: "42".into(),
            user_id: UserId::from(user),
            user_name: user.to_uppercase(),
            removed_by: by.map(UserId::from),
        };
        ServerFrame {
            event: events::CHAT_MEMBER_REMOVED.into(),
            data: serde_json::to_value(payload).unwrap(),
            room: Some(RoomKey::chat_channel("42")),
        }
    }

    #[test]
    fn removal_of_selected_room_runs_full_transition() {
        let f = fixture();
        let room = RoomKey::chat_channel("42");
        assert!(f.tracker.join_room(room.clone()));
        f.view.select(room.clone());
        let frames_before = f.sink.0.load(Ordering::SeqCst);

        assert!(f.enforcer.handle(&removed("me", Some("admin"))).unwrap());

        assert!(!f.tracker.contains(&room));
        assert_eq!(f.view.selected_room(), None);
        assert!(f.stale.is_stale(&AccessRevocationEnforcer::room_list_key()));
        let notices = f.view.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Removed);
        // force-leave sends nothing
        assert_eq!(f.sink.0.load(Ordering::SeqCst), frames_before);
    }

    #[test]
    fn removal_of_other_user_changes_nothing() {
        let f = fixture();
        let room = RoomKey::chat_channel("42");
        let _ = f.tracker.join_room(room.clone());
        f.view.select(room.clone());

        assert!(!f.enforcer.handle(&removed("someone-else", Some("me"))).unwrap());

        assert!(f.tracker.contains(&room));
        assert_eq!(f.view.selected_room(), Some(room));
        assert!(f.view.notices().is_empty());
        assert!(f.stale.is_empty());
    }

    #[test]
    fn self_leave_shows_left_notice() {
        let f = fixture();
        let _ = f.tracker.join_room(RoomKey::chat_channel("42"));
        assert!(f.enforcer.handle(&removed("me", None)).unwrap());
        assert!(f.enforcer.handle(&removed("me", Some("me"))).unwrap());
        let kinds: Vec<_> = f.view.notices().into_iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NoticeKind::Left, NoticeKind::Left]);
    }

    #[test]
    fn unselected_room_keeps_selection() {
        let f = fixture();
        let _ = f.tracker.join_room(RoomKey::chat_channel("42"));
        f.view.select(RoomKey::chat_channel("7"));
        assert!(f.enforcer.handle(&removed("me", Some("admin"))).unwrap());
        assert_eq!(f.view.selected_room(), Some(RoomKey::chat_channel("7")));
        assert!(f.stale.is_empty());
        assert_eq!(f.view.notices().len(), 1);
    }

    #[test]
    fn runs_before_normal_handlers() {
        let f = fixture();
        let room = RoomKey::chat_channel("42");
        let _ = f.tracker.join_room(room.clone());
        let d = Dispatcher::new();

        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let t = Arc::clone(&f.tracker);
        let r = room.clone();
        let _normal = d.register(events::CHAT_MEMBER_REMOVED, move |_| {
            *s.lock() = Some(t.contains(&r));
            Ok(())
        });
        let _high = f.enforcer.install(&d);

        let _ = d.dispatch(&removed("me", Some("admin")));
        assert_eq!(*seen.lock(), Some(false));
    }

    #[test]
    fn malformed_payload_is_handler_error() {
        let f = fixture();
        let frame = ServerFrame::unscoped(events::CHAT_MEMBER_REMOVED, serde_json::json!({"x": 1}));
        assert!(f.enforcer.handle(&frame).is_err());
        assert!(f.view.notices().is_empty());
    }

    #[test]
    fn notices_are_dismissible() {
        let view = LocalView::new();
        view.show_notice(Notice {
            kind: NoticeKind::Removed,
            room: RoomKey::chat_dm("d1"),
            by: Some(UserId::from("admin")),
        });
        assert_eq!(
            view.notices()[0].message(),
            "You were removed from chatDm:d1 by admin"
        );
        assert!(view.dismiss(0).is_some());
        assert!(view.dismiss(0).is_none());
    }
}
