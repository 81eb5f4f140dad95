//! Room Membership Registry.
//!
//! Tracks which connections belong to which rooms and fans envelopes out to
//! room members. Lock order is always connection memberships first, then the
//! room's map shard; nothing is awaited while either is held.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use roomcast_core::{ConnectionId, EventEnvelope, RealtimeError, RoomKey, ServerFrame, UserId};
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::{BROADCASTS_TOTAL, BROADCAST_DROPS_TOTAL, ROOMS_ACTIVE};

/// Result of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members whose queue was full or closed.
    pub dropped: usize,
}

type Members = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Connection and room membership index.
#[derive(Default)]
pub struct RoomRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    rooms: DashMap<RoomKey, Members>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened connection.
    pub fn register(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Add a connection to a room.
    ///
    /// Returns `Ok(false)` if it already held the room and
    /// `Err(ConnectionClosed)` if the connection was torn down meanwhile.
    /// Authorization happens before this call.
    pub fn join(&self, connection: &Arc<ClientConnection>, room: &RoomKey) -> Result<bool, RealtimeError> {
        let mut memberships = connection.memberships.lock();
        if memberships.closed {
            return Err(RealtimeError::ConnectionClosed);
        }
        if memberships.rooms.contains(room) {
            return Ok(false);
        }
        let _ = self
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(connection.id.clone(), Arc::clone(connection));
        let _ = memberships.rooms.insert(room.clone());
        drop(memberships);
        self.record_room_gauge();
        Ok(true)
    }

    /// Remove a connection from a room. Returns whether it was a member.
    pub fn leave(&self, connection: &ClientConnection, room: &RoomKey) -> bool {
        let mut memberships = connection.memberships.lock();
        if !memberships.rooms.remove(room) {
            return false;
        }
        self.detach(&connection.id, room);
        drop(memberships);
        self.record_room_gauge();
        true
    }

    /// Drop a connection and purge every membership it held.
    ///
    /// After this returns no room references the connection, and later joins
    /// on it fail with `ConnectionClosed`.
    pub fn unregister(&self, connection: &ClientConnection) -> Vec<RoomKey> {
        let mut memberships = connection.memberships.lock();
        memberships.closed = true;
        let rooms: Vec<RoomKey> = memberships.rooms.drain().collect();
        for room in &rooms {
            self.detach(&connection.id, room);
        }
        drop(memberships);
        let _ = self.connections.remove(&connection.id);
        self.record_room_gauge();
        debug!(conn_id = %connection.id, rooms = rooms.len(), "memberships purged");
        rooms
    }

    /// Remove every connection of `user` from `room`. Returns how many left.
    pub fn revoke_user(&self, room: &RoomKey, user: &UserId) -> usize {
        let targets: Vec<Arc<ClientConnection>> = self
            .members(room)
            .into_iter()
            .filter(|c| c.user_id() == Some(user))
            .collect();
        targets.iter().filter(|c| self.leave(c, room)).count()
    }

    /// Deliver a frame to every current member of `room`.
    ///
    /// Serialization happens once. Saturated or dead members are skipped and
    /// counted; the caller never waits on a slow socket.
    pub fn broadcast_frame(&self, room: &RoomKey, frame: &ServerFrame) -> BroadcastReport {
        let json = match serde_json::to_string(frame) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event = %frame.event, error = %e, "failed to serialize frame");
                return BroadcastReport::default();
            }
        };
        let recipients = self.members(room);
        let mut report = BroadcastReport::default();
        for conn in &recipients {
            if conn.send(Arc::clone(&json)) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
                let err = RealtimeError::DeliveryDrop {
                    connection_id: conn.id.to_string(),
                };
                debug!(event = %frame.event, room = %room, code = err.code(), "{err}");
            }
        }
        counter!(BROADCASTS_TOTAL, "room_type" => room.room_type.as_str()).increment(1);
        if report.dropped > 0 {
            counter!(BROADCAST_DROPS_TOTAL).increment(report.dropped as u64);
        }
        debug!(
            event = %frame.event,
            room = %room,
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast to room"
        );
        report
    }

    /// Fan an envelope out to its target room.
    pub fn broadcast(&self, envelope: &EventEnvelope) -> BroadcastReport {
        self.broadcast_frame(&envelope.target, &envelope.to_frame())
    }

    /// Snapshot of a room's members.
    pub fn members(&self, room: &RoomKey) -> Vec<Arc<ClientConnection>> {
        self.rooms
            .get(room)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `connection` is in `room`.
    pub fn is_member(&self, connection: &ConnectionId, room: &RoomKey) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|m| m.contains_key(connection))
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Members of `room`.
    pub fn member_count(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |m| m.len())
    }

    fn detach(&self, id: &ConnectionId, room: &RoomKey) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            let _ = members.remove(id);
        }
        let _ = self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_room_gauge(&self) {
        gauge!(ROOMS_ACTIVE).set(self.rooms.len() as f64);
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("connections", &self.connections.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Principal, Role};
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(
        registry: &RoomRegistry,
        user: &str,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ClientConnection::new(
            Some(Principal::new(user, "t1", Role::Member)),
            tx,
        ));
        registry.register(Arc::clone(&conn));
        (conn, rx)
    }

    fn envelope(room: &RoomKey) -> EventEnvelope {
        EventEnvelope::new("task:updated", room.clone(), json!({"id": "t1"}))
    }

    #[test]
    fn join_is_idempotent() {
        let reg = RoomRegistry::new();
        let (conn, _rx) = connect(&reg, "u1", 8);
        let room = RoomKey::project("p1");
        assert_eq!(reg.join(&conn, &room), Ok(true));
        assert_eq!(reg.join(&conn, &room), Ok(false));
        assert_eq!(reg.member_count(&room), 1);
        assert_eq!(conn.rooms(), vec![room]);
    }

    #[test]
    fn single_delivery_despite_repeat_joins() {
        let reg = RoomRegistry::new();
        let (conn, mut rx) = connect(&reg, "u1", 8);
        let room = RoomKey::project("p1");
        for _ in 0..3 {
            let _ = reg.join(&conn, &room);
        }
        let report = reg.broadcast(&envelope(&room));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_only_reaches_members() {
        let reg = RoomRegistry::new();
        let (a, mut rx_a) = connect(&reg, "u1", 8);
        let (_b, mut rx_b) = connect(&reg, "u2", 8);
        let room = RoomKey::project("p1");
        let _ = reg.join(&a, &room);
        let _ = reg.broadcast(&envelope(&room));
        let frame: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "task:updated");
        assert_eq!(frame["room"]["type"], "project");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn empty_room_broadcast_is_noop() {
        let reg = RoomRegistry::new();
        let report = reg.broadcast(&envelope(&RoomKey::project("nobody")));
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn leave_removes_and_collects_empty_room() {
        let reg = RoomRegistry::new();
        let (conn, _rx) = connect(&reg, "u1", 8);
        let room = RoomKey::client("c1");
        let _ = reg.join(&conn, &room);
        assert_eq!(reg.room_count(), 1);
        assert!(reg.leave(&conn, &room));
        assert!(!reg.leave(&conn, &room));
        assert_eq!(reg.room_count(), 0);
        assert!(!reg.is_member(&conn.id, &room));
    }

    #[test]
    fn unregister_purges_all_rooms() {
        let reg = RoomRegistry::new();
        let (conn, _rx) = connect(&reg, "u1", 8);
        let (other, _rx2) = connect(&reg, "u2", 8);
        let shared = RoomKey::project("p1");
        let _ = reg.join(&conn, &shared);
        let _ = reg.join(&other, &shared);
        let _ = reg.join(&conn, &RoomKey::chat_channel("42"));
        let _ = reg.join(&conn, &RoomKey::workspace("w1"));

        let purged = reg.unregister(&conn);
        assert_eq!(purged.len(), 3);
        assert_eq!(reg.connection_count(), 1);
        assert_eq!(reg.member_count(&shared), 1);
        assert_eq!(reg.room_count(), 1);
        assert!(conn.rooms().is_empty());
    }

    #[test]
    fn join_after_unregister_is_refused() {
        let reg = RoomRegistry::new();
        let (conn, _rx) = connect(&reg, "u1", 8);
        let _ = reg.unregister(&conn);
        assert_matches!(
            reg.join(&conn, &RoomKey::project("p1")),
            Err(RealtimeError::ConnectionClosed)
        );
        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn saturated_member_is_dropped_not_awaited() {
        let reg = RoomRegistry::new();
        let (slow, _slow_rx) = connect(&reg, "u1", 1);
        let (fast, mut fast_rx) = connect(&reg, "u2", 8);
        let room = RoomKey::project("p1");
        let _ = reg.join(&slow, &room);
        let _ = reg.join(&fast, &room);

        let first = reg.broadcast(&envelope(&room));
        assert_eq!(first.delivered, 2);
        let second = reg.broadcast(&envelope(&room));
        assert_eq!(second, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(slow.drop_count(), 1);
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn revoke_user_removes_all_their_connections() {
        let reg = RoomRegistry::new();
        let room = RoomKey::chat_channel("42");
        let (phone, _r1) = connect(&reg, "u1", 8);
        let (laptop, _r2) = connect(&reg, "u1", 8);
        let (bob, _r3) = connect(&reg, "u2", 8);
        for c in [&phone, &laptop, &bob] {
            let _ = reg.join(c, &room);
        }
        assert_eq!(reg.revoke_user(&room, &UserId::from("u1")), 2);
        assert_eq!(reg.member_count(&room), 1);
        assert!(reg.is_member(&bob.id, &room));
    }

    #[tokio::test]
    async fn concurrent_join_and_unregister_leave_no_orphans() {
        let reg = Arc::new(RoomRegistry::new());
        for round in 0..50 {
            let (conn, _rx) = connect(&reg, "u1", 8);
            let room = RoomKey::project(format!("p{round}"));
            let (r1, c1, room1) = (Arc::clone(&reg), Arc::clone(&conn), room.clone());
            let joiner = tokio::spawn(async move { r1.join(&c1, &room1) });
            let (r2, c2) = (Arc::clone(&reg), Arc::clone(&conn));
            let closer = tokio::spawn(async move { r2.unregister(&c2) });
            let _ = joiner.await.unwrap();
            let _ = closer.await.unwrap();
            assert!(!reg.is_member(&conn.id, &room));
        }
        assert_eq!(reg.room_count(), 0);
    }
}
