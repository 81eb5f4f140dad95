//! Auto-reconnecting client connection.
//!
//! A background task owns the transport. It reports lifecycle changes and
//! inbound frames as [`ConnectionEvent`]s, reconnects with capped exponential
//! backoff after any failure, and goes [`ConnectionEvent::Offline`] once the
//! policy's attempts are used up. Nothing here ever blocks the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use roomcast_core::{ClientRequest, ReconnectPolicy, ServerFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::FrameSink;
use crate::transport::{Connector, Transport};

/// Time the background task gets to close the transport on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle signals and inbound frames.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// A transport is open.
    Connected,
    /// The open transport was lost or closed.
    Disconnected {
        /// What happened.
        reason: String,
    },
    /// A connect attempt failed.
    ConnectError {
        /// Why.
        reason: String,
    },
    /// Reconnect attempts are exhausted; the task has stopped.
    Offline,
    /// A frame from the server.
    Frame(ServerFrame),
}

/// Handle to the background connection task.
pub struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start connecting. Must be called within a Tokio runtime.
    pub fn open(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            connector,
            policy,
            outbound_rx,
            events_tx,
            Arc::clone(&connected),
            cancel.clone(),
        ));
        let connection = Self {
            outbound: outbound_tx,
            connected,
            cancel,
            task: Mutex::new(Some(task)),
        };
        (connection, events_rx)
    }

    /// Queue a request. Dropped (returns `false`) while disconnected.
    pub fn send(&self, request: &ClientRequest) -> bool {
        if !self.is_connected() {
            debug!(event = request.event_name(), "dropping frame while disconnected");
            return false;
        }
        match serde_json::to_string(request) {
            Ok(json) => self.outbound.send(json).is_ok(),
            Err(e) => {
                warn!(event = request.event_name(), error = %e, "failed to serialize request");
                false
            }
        }
    }

    /// Whether a transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Signal the task to stop without waiting for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop reconnecting and close the transport.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl FrameSink for Connection {
    fn send_request(&self, request: &ClientRequest) -> bool {
        self.send(request)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

enum Exit {
    Cancelled,
    Lost(String),
}

async fn run(
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    // Attempts since the last successful connect; the first connect is free.
    let mut attempt: u32 = 0;
    let mut first = true;

    loop {
        if !first {
            if policy.exhausted(attempt) {
                info!(attempts = attempt, "reconnect attempts exhausted, going offline");
                let _ = events.send(ConnectionEvent::Offline);
                break;
            }
            let delay = policy.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis(), "waiting before reconnect");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => break,
            }
            attempt += 1;
        }
        first = false;

        let opened = tokio::select! {
            opened = connector.connect() => opened,
            () = cancel.cancelled() => break,
        };
        let mut transport = match opened {
            Ok(t) => t,
            Err(e) => {
                debug!(attempt, error = %e, "connect attempt failed");
                let _ = events.send(ConnectionEvent::ConnectError {
                    reason: e.to_string(),
                });
                continue;
            }
        };

        attempt = 0;
        // Frames queued against the previous transport are stale; the ledger
        // replays what matters.
        while outbound.try_recv().is_ok() {}
        connected.store(true, Ordering::Release);
        let _ = events.send(ConnectionEvent::Connected);

        let exit = pump(transport.as_mut(), &mut outbound, &events, &cancel).await;
        connected.store(false, Ordering::Release);
        match exit {
            Exit::Cancelled => {
                if let Err(e) = transport.close().await {
                    debug!(error = %e, "transport close failed");
                }
                let _ = events.send(ConnectionEvent::Disconnected {
                    reason: "client disconnect".into(),
                });
                break;
            }
            Exit::Lost(reason) => {
                info!(%reason, "connection lost");
                let _ = events.send(ConnectionEvent::Disconnected { reason });
            }
        }
    }
    debug!("connection task exited");
}

async fn pump(
    transport: &mut dyn Transport,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    cancel: &CancellationToken,
) -> Exit {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Exit::Cancelled,
            out = outbound.recv() => {
                let Some(text) = out else { return Exit::Cancelled };
                if let Err(e) = transport.send(text).await {
                    return Exit::Lost(e.to_string());
                }
            }
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => match ServerFrame::from_json(&text) {
                    Ok(frame) => {
                        let _ = events.send(ConnectionEvent::Frame(frame));
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed server frame"),
                },
                Some(Err(e)) => return Exit::Lost(e.to_string()),
                None => return Exit::Lost("transport closed by server".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use assert_matches::assert_matches;
    use roomcast_core::RoomKey;

    fn policy(attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            reconnection_attempts: attempts,
            ..ReconnectPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_forwards_frames() {
        let (connector, mut links) = MockConnector::new();
        let (conn, mut events) = Connection::open(Arc::new(connector), policy(3));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        assert!(conn.is_connected());

        let mut link = links.recv().await.unwrap();
        link.push(&ServerFrame::unscoped("task:updated", serde_json::json!({"id": 1})));
        assert_matches!(events.recv().await, Some(ConnectionEvent::Frame(f)) if f.event == "task:updated");

        let join = ClientRequest::join(&RoomKey::project("p1")).unwrap();
        assert!(conn.send(&join));
        assert_eq!(link.next_request().await, join);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_loss() {
        let (connector, mut links) = MockConnector::new();
        let (_conn, mut events) = Connection::open(Arc::new(connector), policy(3));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        links.recv().await.unwrap().hang_up();

        assert_matches!(events.recv().await, Some(ConnectionEvent::Disconnected { .. }));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        assert!(links.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn goes_offline_after_exhausting_attempts() {
        let (connector, _links) = MockConnector::new();
        connector.fail_next(u32::MAX);
        let attempts = connector.attempts();
        let (conn, mut events) = Connection::open(Arc::new(connector), policy(3));

        let mut errors = 0;
        loop {
            match events.recv().await {
                Some(ConnectionEvent::ConnectError { .. }) => errors += 1,
                Some(ConnectionEvent::Offline) => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        // The initial attempt plus three retries.
        assert_eq!(errors, 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(!conn.is_connected());
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connect_resets_attempts() {
        let (connector, mut links) = MockConnector::new();
        connector.fail_next(2);
        let (_conn, mut events) = Connection::open(Arc::new(connector), policy(2));
        assert_matches!(events.recv().await, Some(ConnectionEvent::ConnectError { .. }));
        assert_matches!(events.recv().await, Some(ConnectionEvent::ConnectError { .. }));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        links.recv().await.unwrap().hang_up();
        assert_matches!(events.recv().await, Some(ConnectionEvent::Disconnected { .. }));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let (connector, _links) = MockConnector::new();
        connector.fail_next(u32::MAX);
        let no_jitter = ReconnectPolicy {
            randomization_factor: 0.0,
            reconnection_attempts: 4,
            ..ReconnectPolicy::default()
        };
        let started = tokio::time::Instant::now();
        let (_conn, mut events) = Connection::open(Arc::new(connector), no_jitter);
        while let Some(ev) = events.recv().await {
            if ev == ConnectionEvent::Offline {
                break;
            }
        }
        // 1000 + 2000 + 4000 + 5000 (capped)
        assert_eq!(started.elapsed(), Duration::from_millis(12_000));
    }

    #[tokio::test(start_paused = true)]
    async fn frames_sent_while_disconnected_are_dropped() {
        let (connector, _links) = MockConnector::new();
        connector.fail_next(u32::MAX);
        let (conn, mut events) = Connection::open(Arc::new(connector), policy(1));
        assert_matches!(events.recv().await, Some(ConnectionEvent::ConnectError { .. }));
        let join = ClientRequest::join(&RoomKey::project("p1")).unwrap();
        assert!(!conn.send(&join));
    }

    #[tokio::test(start_paused = true)]
    async fn close_emits_disconnected_and_stops() {
        let (connector, mut links) = MockConnector::new();
        let (conn, mut events) = Connection::open(Arc::new(connector), policy(3));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let link = links.recv().await.unwrap();
        conn.close().await;
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Disconnected {
                reason: "client disconnect".into()
            })
        );
        assert_eq!(events.recv().await, None);
        assert!(link.was_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_when_disabled() {
        let (connector, mut links) = MockConnector::new();
        let policy = ReconnectPolicy {
            reconnection: false,
            ..ReconnectPolicy::default()
        };
        let (_conn, mut events) = Connection::open(Arc::new(connector), policy);
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        links.recv().await.unwrap().hang_up();
        assert_matches!(events.recv().await, Some(ConnectionEvent::Disconnected { .. }));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Offline));
    }
}
