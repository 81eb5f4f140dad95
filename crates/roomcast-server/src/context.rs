//! Shared state handed to every socket session.

use std::sync::Arc;

use async_trait::async_trait;
use roomcast_core::{RealtimeError, RoomKey};
use serde_json::Value;

use crate::auth::{AccessDirectory, PrincipalResolver};
use crate::websocket::registry::RoomRegistry;

/// Persistence hook for messages sent over `chat:send`.
///
/// Storage belongs to the CRUD layer; the gateway calls this before fan-out
/// and carries on if it fails.
#[async_trait]
pub trait ChatMessageSink: Send + Sync {
    /// Store a stamped message for `room`.
    async fn persist(&self, room: &RoomKey, message: &Value) -> Result<(), RealtimeError>;
}

/// Sink that stores nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardChatSink;

#[async_trait]
impl ChatMessageSink for DiscardChatSink {
    async fn persist(&self, _room: &RoomKey, _message: &Value) -> Result<(), RealtimeError> {
        Ok(())
    }
}

/// Collaborators shared by all connections.
#[derive(Clone)]
pub struct GatewayContext {
    /// Membership index and fan-out.
    pub registry: Arc<RoomRegistry>,
    /// Ownership and chat-membership lookups.
    pub directory: Arc<dyn AccessDirectory>,
    /// Upgrade-request principal extraction.
    pub resolver: Arc<dyn PrincipalResolver>,
    /// Chat persistence hook.
    pub chat_sink: Arc<dyn ChatMessageSink>,
}

impl GatewayContext {
    /// Context over a fresh registry.
    pub fn new(
        directory: Arc<dyn AccessDirectory>,
        resolver: Arc<dyn PrincipalResolver>,
        chat_sink: Arc<dyn ChatMessageSink>,
    ) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new()),
            directory,
            resolver,
            chat_sink,
        }
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
