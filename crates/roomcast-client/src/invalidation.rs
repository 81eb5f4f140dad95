//! Server events as refetch signals.
//!
//! Every inbound event is reduced to the cache keys it makes stale. Payload
//! values never reach the cache: the [`CacheInvalidator`] sees keys only,
//! and fresh data always comes from the next authoritative fetch. Applying
//! the same event twice marks the same keys, so replays and duplicates
//! converge.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::events::{self, EntityEvent};
use roomcast_core::{ChatTarget, RoomType, ServerFrame};
use serde_json::Value;
use tracing::trace;

use crate::dispatch::{ANY_EVENT, Dispatcher, Subscription};

/// Query key of a cached read, e.g. `["tasks", "p1"]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub Vec<String>);

impl CacheKey {
    /// Build from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` starts with every segment of `prefix`.
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// The local read cache, as far as invalidation is concerned.
pub trait CacheInvalidator: Send + Sync {
    /// Mark `key` stale so the next read refetches it.
    fn invalidate(&self, key: &CacheKey);
}

/// In-memory [`CacheInvalidator`]: the set of keys awaiting a refetch.
#[derive(Debug, Default)]
pub struct StaleSet {
    keys: Mutex<BTreeSet<CacheKey>>,
}

impl StaleSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is waiting for a refetch.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.keys.lock().contains(key)
    }

    /// Drain every stale key (the refetch pass).
    pub fn take_all(&self) -> Vec<CacheKey> {
        std::mem::take(&mut *self.keys.lock()).into_iter().collect()
    }

    /// Snapshot without draining.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.keys.lock().iter().cloned().collect()
    }

    /// Number of stale keys.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether nothing is stale.
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl CacheInvalidator for StaleSet {
    fn invalidate(&self, key: &CacheKey) {
        let _ = self.keys.lock().insert(key.clone());
    }
}

/// Maps server events to cache keys and forwards them to the invalidator.
#[derive(Clone)]
pub struct InvalidationDispatcher {
    invalidator: Arc<dyn CacheInvalidator>,
}

impl InvalidationDispatcher {
    /// Forward invalidations to `invalidator`.
    pub fn new(invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self { invalidator }
    }

    /// Invalidate the keys `frame` touches. Returns how many.
    pub fn apply(&self, frame: &ServerFrame) -> usize {
        let keys = Self::keys_for(frame);
        for key in &keys {
            trace!(event = %frame.event, key = %key, "invalidate");
            self.invalidator.invalidate(key);
        }
        keys.len()
    }

    /// Invalidate a key directly (e.g. the room list after a revocation).
    pub fn invalidate(&self, key: &CacheKey) {
        self.invalidator.invalidate(key);
    }

    /// Route every dispatched frame through [`apply`](Self::apply).
    pub fn install(&self, dispatcher: &Dispatcher) -> Subscription {
        let this = self.clone();
        dispatcher.register(ANY_EVENT, move |frame| {
            let _ = this.apply(frame);
            Ok(())
        })
    }

    /// Cache keys made stale by `frame`. Unknown events map to nothing.
    pub fn keys_for(frame: &ServerFrame) -> Vec<CacheKey> {
        if let Some(entity) = EntityEvent::parse(&frame.event) {
            return entity_keys(entity, frame);
        }
        match frame.event.as_str() {
            events::CHAT_NEW_MESSAGE => chat_keys(frame, "messages"),
            events::CHAT_MEMBER_ADDED | events::CHAT_MEMBER_REMOVED => {
                chat_keys(frame, "members")
            }
            e if events::NOTIFICATION_EVENTS.contains(&e) => vec![
                CacheKey::new(["notifications"]),
                CacheKey::new(["notifications", "unread"]),
            ],
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for InvalidationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationDispatcher").finish_non_exhaustive()
    }
}

/// `["tasks", scopeId]` for the list, `["task", taskId]` for the detail.
fn entity_keys(entity: EntityEvent, frame: &ServerFrame) -> Vec<CacheKey> {
    let kind = entity.kind;
    let scope = frame
        .room
        .as_ref()
        .filter(|room| room.room_type != RoomType::UserNotification)
        .map(|room| room.id.clone())
        .or_else(|| string_field(&frame.data, "projectId"));

    let mut keys = Vec::with_capacity(2);
    match scope {
        Some(scope) => keys.push(CacheKey::new([kind.collection().to_owned(), scope])),
        None => keys.push(CacheKey::new([kind.collection()])),
    }
    let id = string_field(&frame.data, &kind.id_field()).or_else(|| string_field(&frame.data, "id"));
    if let Some(id) = id {
        keys.push(CacheKey::new([kind.as_str().to_owned(), id]));
    }
    keys
}

/// `["chat", targetType, targetId, tail]`.
fn chat_keys(frame: &ServerFrame, tail: &str) -> Vec<CacheKey> {
    let from_room = frame
        .room
        .as_ref()
        .and_then(|room| Some((room.room_type.chat_target()?, room.id.clone())));
    let target = from_room.or_else(|| {
        let target_type = serde_json::from_value::<ChatTarget>(frame.data.get("targetType")?.clone()).ok()?;
        Some((target_type, string_field(&frame.data, "targetId")?))
    });
    match target {
        Some((target_type, id)) => vec![CacheKey::new([
            "chat".to_owned(),
            target_name(target_type).to_owned(),
            id,
            tail.to_owned(),
        ])],
        None => Vec::new(),
    }
}

fn target_name(target: ChatTarget) -> &'static str {
    match target {
        ChatTarget::Channel => "channel",
        ChatTarget::Dm => "dm",
    }
}

/// String or numeric id field.
fn string_field(data: &Value, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
