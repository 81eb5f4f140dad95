//! Client session: one connection plus everything that hangs off it.
//!
//! The application owns a [`SessionContext`] for as long as the user is
//! signed in and hands `Arc<ClientSession>` to whatever needs realtime
//! events. There is no global connection; the context enforces the
//! one-connection-per-session rule.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use roomcast_core::events;
use roomcast_core::protocol::{ChatSendPayload, RoomErrorPayload};
use roomcast_core::{ChatTarget, ClientRequest, ReconnectPolicy, RoomKey, ServerFrame, UserId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionEvent};
use crate::dispatch::{Dispatcher, Subscription};
use crate::invalidation::{CacheInvalidator, InvalidationDispatcher};
use crate::revocation::{AccessRevocationEnforcer, ViewState};
use crate::tracker::{FrameSink, RoomTracker};
use crate::transport::Connector;

/// Capacity of the app-facing signal channel.
const SIGNAL_CAPACITY: usize = 64;

/// Time the pump gets to drain after the connection closes.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle signals surfaced to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionSignal {
    /// Connected; room memberships were replayed.
    Connected,
    /// The connection dropped; reconnecting.
    Disconnected {
        /// What happened.
        reason: String,
    },
    /// A connect attempt failed; retrying.
    ConnectError {
        /// Why.
        reason: String,
    },
    /// Reconnect attempts are exhausted. Persistent until a new session.
    Offline,
    /// The server refused a join.
    JoinDenied {
        /// Room that was refused.
        room: RoomKey,
        /// Server message.
        message: String,
    },
}

/// What a session needs besides the connector.
#[derive(Clone)]
pub struct SessionOptions {
    /// The signed-in user.
    pub local_user: UserId,
    /// Reconnect behaviour.
    pub policy: ReconnectPolicy,
    /// UI state touched by access revocation.
    pub view: Arc<dyn ViewState>,
    /// The local read cache.
    pub invalidator: Arc<dyn CacheInvalidator>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("local_user", &self.local_user)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// One signed-in session's realtime state.
pub struct ClientSession {
    local_user: UserId,
    connection: Arc<Connection>,
    tracker: Arc<RoomTracker>,
    dispatcher: Dispatcher,
    invalidation: InvalidationDispatcher,
    subscriptions: Mutex<Vec<Subscription>>,
    signals: broadcast::Sender<SessionSignal>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    /// Open the connection and wire up tracker, dispatch, invalidation and
    /// revocation. Must be called within a Tokio runtime.
    pub fn start(connector: Arc<dyn Connector>, options: SessionOptions) -> Arc<Self> {
        let (connection, events_rx) = Connection::open(connector, options.policy.clone());
        let connection = Arc::new(connection);
        let tracker = Arc::new(RoomTracker::new(
            Arc::clone(&connection) as Arc<dyn FrameSink>
        ));
        let dispatcher = Dispatcher::new();
        let invalidation = InvalidationDispatcher::new(options.invalidator);
        let enforcer = Arc::new(AccessRevocationEnforcer::new(
            options.local_user.clone(),
            Arc::clone(&tracker),
            options.view,
            invalidation.clone(),
        ));
        let subscriptions = vec![
            enforcer.install(&dispatcher),
            invalidation.install(&dispatcher),
        ];
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        let pump = tokio::spawn(pump(
            events_rx,
            Arc::clone(&tracker),
            dispatcher.clone(),
            signals.clone(),
        ));
        info!(user = %options.local_user, "client session started");

        Arc::new(Self {
            local_user: options.local_user,
            connection,
            tracker,
            dispatcher,
            invalidation,
            subscriptions: Mutex::new(subscriptions),
            signals,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Join a room. `false` if it was already joined.
    pub fn join_room(&self, room: RoomKey) -> bool {
        self.tracker.join_room(room)
    }

    /// Leave a room. `false` if it was not joined.
    pub fn leave_room(&self, room: &RoomKey) -> bool {
        self.tracker.leave_room(room)
    }

    /// Post a chat message. `false` if it could not be queued.
    pub fn send_chat(
        &self,
        target_type: ChatTarget,
        target_id: impl Into<String>,
        body: impl Into<String>,
    ) -> bool {
        self.connection.send(&ClientRequest::ChatSend(ChatSendPayload {
            target_type,
            target_id: target_id.into(),
            body: body.into(),
        }))
    }

    /// Rooms in the ledger.
    pub fn rooms(&self) -> Vec<RoomKey> {
        self.tracker.rooms()
    }

    /// The room ledger.
    pub fn tracker(&self) -> &Arc<RoomTracker> {
        &self.tracker
    }

    /// Handler registry for application components.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Cache invalidation entry point.
    pub fn invalidation(&self) -> &InvalidationDispatcher {
        &self.invalidation
    }

    /// Subscribe to lifecycle signals.
    pub fn signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    /// The signed-in user.
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Leave every room and forget it. The ledger survives disconnects, not
    /// logout.
    pub fn logout(&self) {
        let sent = self.tracker.leave_all();
        info!(user = %self.local_user, left = sent, "room ledger cleared");
    }

    /// Close the connection and stop the pump.
    pub async fn shutdown(&self) {
        self.connection.close().await;
        let pump = self.pump.lock().take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut pump).await.is_err() {
                pump.abort();
            }
        }
        self.subscriptions.lock().clear();
        debug!(user = %self.local_user, "client session shut down");
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        // The pump keeps the connection alive, so stop it explicitly.
        self.connection.stop();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("local_user", &self.local_user)
            .field("connected", &self.is_connected())
            .field("rooms", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

async fn pump(
    mut events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    tracker: Arc<RoomTracker>,
    dispatcher: Dispatcher,
    signals: broadcast::Sender<SessionSignal>,
) {
    while let Some(event) = events_rx.recv().await {
        let signal = match event {
            ConnectionEvent::Connected => {
                let _ = tracker.rehydrate_all();
                Some(SessionSignal::Connected)
            }
            ConnectionEvent::Disconnected { reason } => Some(SessionSignal::Disconnected { reason }),
            ConnectionEvent::ConnectError { reason } => Some(SessionSignal::ConnectError { reason }),
            ConnectionEvent::Offline => {
                warn!("realtime connection offline");
                Some(SessionSignal::Offline)
            }
            ConnectionEvent::Frame(frame) => {
                let denied = join_denial(&frame, &tracker);
                let _ = dispatcher.dispatch(&frame);
                denied
            }
        };
        if let Some(signal) = signal {
            // No subscribers is fine.
            let _ = signals.send(signal);
        }
    }
    debug!("session pump exited");
}

/// A denied join leaves the ledger so it isn't replayed on reconnect.
///
/// Denials of other requests (`chat:send`) leave the ledger alone. Successful
/// joins are not acknowledged, so a denial is matched by room only: if the app
/// leaves and rejoins a room before an earlier join's denial arrives, that
/// late denial still drops the rejoined entry.
fn join_denial(frame: &ServerFrame, tracker: &RoomTracker) -> Option<SessionSignal> {
    if frame.event != events::ROOM_ERROR {
        return None;
    }
    let payload: RoomErrorPayload = match frame.payload() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "malformed room:error");
            return None;
        }
    };
    if !payload.is_join_denial() {
        debug!(
            code = %payload.code,
            request = payload.request.as_deref().unwrap_or("unknown"),
            message = %payload.message,
            "room request failed"
        );
        return None;
    }
    let room = payload.room?;
    let _ = tracker.force_leave(&room);
    info!(room = %room, "join denied");
    Some(SessionSignal::JoinDenied {
        room,
        message: payload.message,
    })
}

/// Owner of at most one [`ClientSession`].
pub struct SessionContext {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    slot: Mutex<Option<Arc<ClientSession>>>,
}

impl SessionContext {
    /// Context that connects through `connector`. Nothing is opened yet.
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        Self {
            connector,
            options,
            slot: Mutex::new(None),
        }
    }

    /// The live session, starting one if there is none.
    pub fn connect(&self) -> Arc<ClientSession> {
        let mut slot = self.slot.lock();
        if let Some(session) = slot.as_ref() {
            return Arc::clone(session);
        }
        let session = ClientSession::start(Arc::clone(&self.connector), self.options.clone());
        *slot = Some(Arc::clone(&session));
        session
    }

    /// Tear down the live session, if any. The next [`connect`](Self::connect)
    /// starts a fresh one.
    pub async fn disconnect(&self) {
        let session = self.slot.lock().take();
        if let Some(session) = session {
            session.shutdown().await;
        }
    }

    /// The live session without starting one.
    pub fn current(&self) -> Option<Arc<ClientSession>> {
        self.slot.lock().clone()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("active", &self.slot.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::{CacheKey, StaleSet};
    use crate::revocation::{LocalView, NoticeKind};
    use crate::testing::{MockConnector, MockLink};
    use assert_matches::assert_matches;
    use roomcast_core::RealtimeError;
    use roomcast_core::protocol::MemberRemovedPayload;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        context: SessionContext,
        links: mpsc::UnboundedReceiver<MockLink>,
        view: Arc<LocalView>,
        stale: Arc<StaleSet>,
    }

    fn boot_with(connector: MockConnector, links: mpsc::UnboundedReceiver<MockLink>, attempts: u32) -> Harness {
        let view = Arc::new(LocalView::new());
        let stale = Arc::new(StaleSet::new());
        let options = SessionOptions {
            local_user: UserId::from("me"),
            policy: ReconnectPolicy {
                reconnection_attempts: attempts,
                ..ReconnectPolicy::default()
            },
            view: Arc::clone(&view) as Arc<dyn ViewState>,
            invalidator: Arc::clone(&stale) as Arc<dyn CacheInvalidator>,
        };
        Harness {
            context: SessionContext::new(Arc::new(connector), options),
            links,
            view,
            stale,
        }
    }

    fn boot(attempts: u32) -> Harness {
        let (connector, links) = MockConnector::new();
        boot_with(connector, links, attempts)
    }

    async fn next_signal(rx: &mut broadcast::Receiver<SessionSignal>) -> SessionSignal {
        rx.recv().await.unwrap()
    }

    async fn joins(link: &mut MockLink, n: usize) -> BTreeSet<RoomKey> {
        let mut rooms = BTreeSet::new();
        for _ in 0..n {
            let req = link.next_request().await;
            assert!(req.is_join(), "{req:?}");
            let _ = rooms.insert(req.room());
        }
        rooms
    }

    #[tokio::test(start_paused = true)]
    async fn connect_returns_the_same_session() {
        let h = boot(3);
        let a = h.context.connect();
        let b = h.context.connect();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(h.context.current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_slot() {
        let mut h = boot(3);
        let first = h.context.connect();
        let mut signals = first.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let link = h.links.recv().await.unwrap();

        h.context.disconnect().await;
        assert!(h.context.current().is_none());
        assert!(link.was_closed());
        assert!(!first.is_connected());

        let second = h.context.connect();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_context_closes_the_transport() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let link = h.links.recv().await.unwrap();

        drop(session);
        drop(h.context);
        while !link.was_closed() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_chat_goes_out_as_chat_send() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();

        assert!(session.send_chat(ChatTarget::Channel, "42", "hello"));
        assert_eq!(
            link.next_request().await,
            ClientRequest::ChatSend(ChatSendPayload {
                target_type: ChatTarget::Channel,
                target_id: "42".into(),
                body: "hello".into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rehydrates_every_room() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        let rooms = [
            RoomKey::project("a"),
            RoomKey::client("b"),
            RoomKey::chat_channel("c"),
        ];
        for r in &rooms {
            assert!(session.join_room(r.clone()));
        }
        let expected: BTreeSet<_> = rooms.iter().cloned().collect();

        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();
        assert_eq!(joins(&mut link, 3).await, expected);

        link.hang_up();
        assert_matches!(next_signal(&mut signals).await, SessionSignal::Disconnected { .. });
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();
        assert_eq!(joins(&mut link, 3).await, expected);
        assert!(link.drain_requests().is_empty());
        assert_eq!(session.rooms().into_iter().collect::<BTreeSet<_>>(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_join_leaves_ledger_and_signals() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();

        let room = RoomKey::chat_channel("secret");
        assert!(session.join_room(room.clone()));
        let _ = link.next_request().await;
        link.push(
            &RoomErrorPayload::from_error(&RealtimeError::denied(&room, "not a member"), None)
                .for_request(events::CHAT_JOIN)
                .into_frame(),
        );

        assert_matches!(
            next_signal(&mut signals).await,
            SessionSignal::JoinDenied { room: r, .. } if r == room
        );
        assert!(!session.tracker().contains(&room));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_chat_send_keeps_the_room() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();

        let room = RoomKey::chat_channel("42");
        assert!(session.join_room(room.clone()));
        let _ = link.next_request().await;
        let denial = |room: &RoomKey, request: &str| {
            RoomErrorPayload::from_error(&RealtimeError::denied(room, "not a member"), None)
                .for_request(request)
                .into_frame()
        };
        link.push(&denial(&room, events::CHAT_SEND));
        // Frames are pumped in order, so the next signal proves the first
        // denial produced none.
        let other = RoomKey::project("p9");
        link.push(&denial(&other, events::ROOM_JOIN_PROJECT));

        assert_matches!(
            next_signal(&mut signals).await,
            SessionSignal::JoinDenied { room: r, .. } if r == other
        );
        assert!(session.tracker().contains(&room));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_is_surfaced() {
        let (connector, links) = MockConnector::new();
        connector.fail_next(u32::MAX);
        let h = boot_with(connector, links, 1);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_matches!(next_signal(&mut signals).await, SessionSignal::ConnectError { .. });
        assert_matches!(next_signal(&mut signals).await, SessionSignal::ConnectError { .. });
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Offline);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_stops_rehydration() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();
        let _ = session.join_room(RoomKey::project("p1"));
        let _ = link.next_request().await;

        session.logout();
        assert_eq!(
            link.next_request().await,
            ClientRequest::leave(&RoomKey::project("p1")).unwrap()
        );
        link.hang_up();
        assert_matches!(next_signal(&mut signals).await, SessionSignal::Disconnected { .. });
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let mut link = h.links.recv().await.unwrap();
        tokio::task::yield_now().await;
        assert!(link.drain_requests().is_empty());
        assert!(session.rooms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn room_scoped_handler_is_isolated() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let link = h.links.recv().await.unwrap();
        let _ = session.join_room(RoomKey::chat_channel("42"));

        let hits = Arc::new(AtomicUsize::new(0));
        let h42 = Arc::clone(&hits);
        let _sub = session.dispatcher().register_scoped(
            events::CHAT_NEW_MESSAGE,
            RoomKey::chat_channel("42"),
            move |_| {
                let _ = h42.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        let msg = |id: &str| ServerFrame {
            event: events::CHAT_NEW_MESSAGE.into(),
            data: json!({"targetType": "channel", "targetId": id, "message": {"body": "x"}}),
            room: Some(RoomKey::chat_channel(id)),
        };
        link.push(&msg("99"));
        link.push(&msg("42"));
        // A second, unscoped frame acts as a barrier for the pump.
        link.push(&ServerFrame::unscoped(events::NOTIFICATION_NEW, json!({})));
        while !h.stale.is_stale(&CacheKey::new(["notifications"])) {
            tokio::task::yield_now().await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(h.stale.is_stale(&CacheKey::new(["chat", "channel", "99", "messages"])));
    }

    #[tokio::test(start_paused = true)]
    async fn member_removed_frame_reaches_enforcer() {
        let mut h = boot(3);
        let session = h.context.connect();
        let mut signals = session.signals();
        assert_eq!(next_signal(&mut signals).await, SessionSignal::Connected);
        let link = h.links.recv().await.unwrap();
        let room = RoomKey::chat_channel("42");
        let _ = session.join_room(room.clone());
        h.view.select(room.clone());

        let payload = MemberRemovedPayload {
            target_type: ChatTarget::Channel,
            target_id: "42".into(),
            user_id: UserId::from("me"),
            user_name: "Me".into(),
            removed_by: Some(UserId::from("admin")),
        };
        link.push(&ServerFrame {
            event: events::CHAT_MEMBER_REMOVED.into(),
            data: serde_json::to_value(payload).unwrap(),
            room: Some(room.clone()),
        });
        while h.view.notices().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.view.notices()[0].kind, NoticeKind::Removed);
        assert!(!session.tracker().contains(&room));
        assert_eq!(h.view.selected_room(), None);
        assert!(h.stale.is_stale(&CacheKey::new(["chat", "channel", "42", "members"])));
    }
}
