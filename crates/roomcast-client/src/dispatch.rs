//! Typed, room-scoped event dispatch.
//!
//! Handlers are registered per event name, optionally narrowed to a single
//! room, and stay registered exactly as long as the returned
//! [`Subscription`] lives. Each handler runs in isolation: an error or a
//! panic in one is logged and never stops delivery to the others.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use roomcast_core::{RealtimeError, RoomKey, ServerFrame};
use tracing::{trace, warn};

/// Event name matching every frame.
pub const ANY_EVENT: &str = "*";

/// Handler callback.
pub type Handler = Arc<dyn Fn(&ServerFrame) -> Result<(), RealtimeError> + Send + Sync>;

/// Ordering class. `High` handlers run before any `Normal` handler for the
/// same frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// State-machine handlers that must observe the event first.
    High,
    /// Everything else.
    #[default]
    Normal,
}

struct Entry {
    id: u64,
    event: String,
    room: Option<RoomKey>,
    priority: Priority,
    handler: Handler,
}

impl Entry {
    fn matches(&self, frame: &ServerFrame) -> bool {
        if self.event != ANY_EVENT && self.event != frame.event {
            return false;
        }
        match &self.room {
            None => true,
            Some(room) => frame.room.as_ref() == Some(room),
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }
}

/// Outcome of dispatching one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that ran.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Handler registry. Cheap to clone; clones share registrations.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for every frame named `event`.
    pub fn register<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&ServerFrame) -> Result<(), RealtimeError> + Send + Sync + 'static,
    {
        self.register_with(event, None, Priority::Normal, handler)
    }

    /// Register for frames named `event` that target `room`.
    pub fn register_scoped<F>(
        &self,
        event: impl Into<String>,
        room: RoomKey,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&ServerFrame) -> Result<(), RealtimeError> + Send + Sync + 'static,
    {
        self.register_with(event, Some(room), Priority::Normal, handler)
    }

    /// Full-control registration.
    pub fn register_with<F>(
        &self,
        event: impl Into<String>,
        room: Option<RoomKey>,
        priority: Priority,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&ServerFrame) -> Result<(), RealtimeError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let event = event.into();
        trace!(event, id, "handler registered");
        self.inner.entries.lock().push(Entry {
            id,
            event,
            room,
            priority,
            handler: Arc::new(handler),
        });
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            active: true,
        }
    }

    /// Deliver `frame` to every matching handler.
    ///
    /// Handlers are snapshotted first, so a handler may register or drop
    /// subscriptions without deadlocking; such changes apply from the next
    /// frame on.
    pub fn dispatch(&self, frame: &ServerFrame) -> DispatchReport {
        let mut matched: Vec<(Priority, u64, Handler)> = self
            .inner
            .entries
            .lock()
            .iter()
            .filter(|e| e.matches(frame))
            .map(|e| (e.priority, e.id, Arc::clone(&e.handler)))
            .collect();
        matched.sort_by_key(|(priority, id, _)| (*priority, *id));

        let mut report = DispatchReport::default();
        for (_, id, handler) in matched {
            report.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(frame)));
            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(panic) => RealtimeError::HandlerError {
                    event: frame.event.clone(),
                    message: panic_message(panic.as_ref()),
                },
            };
            report.failed += 1;
            warn!(event = %frame.event, handler = id, error = %err, "event handler failed");
        }
        report
    }

    /// Number of live registrations.
    pub fn handler_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Number of live registrations for `event`.
    pub fn handlers_for(&self, event: &str) -> usize {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .count()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

/// Registration handle. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription unregisters its handler"]
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Unregister now. Returns `false` if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.active && self.inner.strong_count() > 0
    }

    fn release(&mut self) -> bool {
        if !std::mem::take(&mut self.active) {
            return false;
        }
        self.inner.upgrade().is_some_and(|inner| inner.remove(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
