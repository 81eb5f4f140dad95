//! In-memory transport for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use roomcast_core::{ClientRequest, RealtimeError, ServerFrame};
use tokio::sync::mpsc;

use crate::transport::{Connector, Transport};

/// Test-side end of one mock transport.
pub(crate) struct MockLink {
    sent: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<Option<String>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    /// Deliver a frame to the client.
    pub(crate) fn push(&self, frame: &ServerFrame) {
        let _ = self.push.send(Some(serde_json::to_string(frame).unwrap()));
    }

    /// Simulate the server dropping the connection.
    pub(crate) fn hang_up(&self) {
        let _ = self.push.send(None);
    }

    /// Next request the client sent.
    pub(crate) async fn next_request(&mut self) -> ClientRequest {
        let text = self.sent.recv().await.expect("transport dropped");
        ClientRequest::from_json(&text).unwrap()
    }

    /// Requests sent so far, without waiting.
    pub(crate) fn drain_requests(&mut self) -> Vec<ClientRequest> {
        let mut out = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            out.push(ClientRequest::from_json(&text).unwrap());
        }
        out
    }

    /// Whether the client closed the transport.
    pub(crate) fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    sent: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Option<String>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), RealtimeError> {
        self.sent
            .send(text)
            .map_err(|_| RealtimeError::transport("mock link dropped"))
    }

    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        match self.inbound.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing each opened transport's test end to the test.
pub(crate) struct MockConnector {
    links: mpsc::UnboundedSender<MockLink>,
    failures_left: AtomicU32,
    attempts: Arc<AtomicU32>,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockLink>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            links: tx,
            failures_left: AtomicU32::new(0),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        (connector, rx)
    }

    /// Fail the next `n` connect attempts.
    pub(crate) fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Shared counter of connect attempts.
    pub(crate) fn attempts(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RealtimeError::transport("connection refused"));
        }
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.links.send(MockLink {
            sent: sent_rx,
            push: push_tx,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(MockTransport {
            sent: sent_tx,
            inbound: push_rx,
            closed,
        }))
    }
}
