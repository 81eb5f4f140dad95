//! Room Membership Tracker: the client's room ledger.
//!
//! The ledger is the set of rooms this session wants to be in. It is added
//! to optimistically on join, and only explicit leaves, forced leaves and
//! logout remove entries. Disconnects never touch it, so after every
//! reconnect [`RoomTracker::rehydrate_all`] can replay it verbatim.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::{ClientRequest, RoomKey};
use tracing::debug;

/// Where join and leave requests go.
pub trait FrameSink: Send + Sync {
    /// Queue a request; `false` if it was dropped.
    fn send_request(&self, request: &ClientRequest) -> bool;
}

/// The room ledger plus the join/leave protocol around it.
pub struct RoomTracker {
    ledger: Mutex<BTreeSet<RoomKey>>,
    sink: Arc<dyn FrameSink>,
}

impl RoomTracker {
    /// Empty ledger sending through `sink`.
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            ledger: Mutex::new(BTreeSet::new()),
            sink,
        }
    }

    /// Join `room` unless the ledger already holds it.
    ///
    /// Returns `false` without any network call when already joined.
    /// Notification rooms are joined by the server and are never tracked.
    pub fn join_room(&self, room: RoomKey) -> bool {
        let Some(request) = ClientRequest::join(&room) else {
            debug!(room = %room, "notification rooms are joined by the server");
            return false;
        };
        // Request and ledger change happen under one lock so a racing leave
        // can't reorder them.
        let mut ledger = self.ledger.lock();
        if ledger.contains(&room) {
            return false;
        }
        if !self.sink.send_request(&request) {
            debug!(room = %room, "join queued for rehydration");
        }
        let _ = ledger.insert(room);
        true
    }

    /// Leave `room` if the ledger holds it.
    ///
    /// Returns `false` without any network call when not joined.
    pub fn leave_room(&self, room: &RoomKey) -> bool {
        let mut ledger = self.ledger.lock();
        if !ledger.remove(room) {
            return false;
        }
        if let Some(request) = ClientRequest::leave(room) {
            let _ = self.sink.send_request(&request);
        }
        true
    }

    /// Drop `room` from the ledger without telling the server.
    ///
    /// Used when the server already removed the membership (revocation, a
    /// denied join).
    pub fn force_leave(&self, room: &RoomKey) -> bool {
        self.ledger.lock().remove(room)
    }

    /// Re-send a join for every ledger entry. Returns how many were sent.
    ///
    /// The ledger itself is left as is. Calling this twice for one connect is
    /// harmless since server joins are idempotent.
    pub fn rehydrate_all(&self) -> usize {
        let ledger = self.ledger.lock();
        let mut sent = 0;
        for room in ledger.iter() {
            if let Some(request) = ClientRequest::join(room) {
                if self.sink.send_request(&request) {
                    sent += 1;
                }
            }
        }
        debug!(rooms = ledger.len(), sent, "rehydrated room memberships");
        sent
    }

    /// Leave every room and empty the ledger (logout). Returns how many
    /// leaves were sent.
    pub fn leave_all(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let mut sent = 0;
        for room in ledger.iter() {
            if let Some(request) = ClientRequest::leave(room) {
                if self.sink.send_request(&request) {
                    sent += 1;
                }
            }
        }
        debug!(rooms = ledger.len(), sent, "left every room");
        ledger.clear();
        sent
    }

    /// Whether `room` is in the ledger.
    pub fn contains(&self, room: &RoomKey) -> bool {
        self.ledger.lock().contains(room)
    }

    /// Ledger snapshot, sorted.
    pub fn rooms(&self) -> Vec<RoomKey> {
        self.ledger.lock().iter().cloned().collect()
    }

    /// Ledger size.
    pub fn len(&self) -> usize {
        self.ledger.lock().len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.ledger.lock().is_empty()
    }
}

impl std::fmt::Debug for RoomTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomTracker")
            .field("rooms", &self.rooms())
            .finish_non_exhaustive()
    }
}
