//! Server-side state of one connected socket.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use roomcast_core::{ConnectionId, RoomKey, ServerFrame, TenantId, UserId};
use tokio::sync::mpsc;

use crate::auth::Principal;

/// Rooms held by a connection, plus the teardown flag.
///
/// Both live under one lock so a join racing a disconnect either completes
/// before the purge snapshot or observes `closed` and is refused.
#[derive(Debug, Default)]
pub(crate) struct MembershipSet {
    pub(crate) closed: bool,
    pub(crate) rooms: HashSet<RoomKey>,
}

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated principal; `None` until (unless) auth resolves.
    principal: Option<Principal>,
    /// Send channel to the socket's write task.
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
    pub(crate) memberships: Mutex<MembershipSet>,
}

impl ClientConnection {
    /// Create a connection with a fresh id.
    pub fn new(principal: Option<Principal>, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_id(ConnectionId::new(), principal, tx)
    }

    /// Create a connection with a given id.
    pub fn with_id(
        id: ConnectionId,
        principal: Option<Principal>,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            principal,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            memberships: Mutex::new(MembershipSet::default()),
        }
    }

    /// Authenticated principal.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Authenticated user id.
    pub fn user_id(&self) -> Option<&UserId> {
        self.principal.as_ref().map(|p| &p.user_id)
    }

    /// Tenant of the authenticated user.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.principal.as_ref().map(|p| &p.tenant_id)
    }

    /// Queue a serialized frame without waiting.
    ///
    /// Returns `false` if the queue is full or the socket is gone; the frame
    /// is dropped and the drop counter incremented.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the write side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.memberships.lock().closed
    }

    /// Rooms currently held.
    pub fn rooms(&self) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self.memberships.lock().rooms.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Record liveness (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last sign of life.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}
