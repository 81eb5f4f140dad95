//! `RoomcastServer`: axum HTTP + WebSocket gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use roomcast_core::ConnectionId;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{AccessDirectory, HeaderPrincipalResolver, InMemoryDirectory, PrincipalResolver};
use crate::config::ServerConfig;
use crate::context::{ChatMessageSink, DiscardChatSink, GatewayContext};
use crate::health::{self, HealthResponse};
use crate::hub::RealtimeHub;
use crate::notify::{EmailSender, InMemoryPreferences, LogEmailSender, NotificationService, PreferenceStore};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::RoomRegistry;
use crate::websocket::session::run_ws_session;

/// How long open sockets get to close after the listener stops.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// External collaborators plugged into the gateway.
#[derive(Clone)]
pub struct ServerDeps {
    /// Room ownership and chat membership.
    pub directory: Arc<dyn AccessDirectory>,
    /// Upgrade-request principal extraction.
    pub resolver: Arc<dyn PrincipalResolver>,
    /// Chat persistence hook.
    pub chat_sink: Arc<dyn ChatMessageSink>,
    /// Notification preferences.
    pub preferences: Arc<dyn PreferenceStore>,
    /// Notification email channel.
    pub email: Arc<dyn EmailSender>,
}

impl Default for ServerDeps {
    fn default() -> Self {
        Self {
            directory: Arc::new(InMemoryDirectory::new()),
            resolver: Arc::new(HeaderPrincipalResolver),
            chat_sink: Arc::new(DiscardChatSink),
            preferences: Arc::new(InMemoryPreferences::new()),
            email: Arc::new(LogEmailSender),
        }
    }
}

/// Shared state of the axum handlers.
#[derive(Clone)]
struct AppState {
    ctx: GatewayContext,
    config: Arc<ServerConfig>,
    shutdown: Arc<ShutdownCoordinator>,
    sessions: TaskTracker,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

/// The realtime gateway.
pub struct RoomcastServer {
    config: Arc<ServerConfig>,
    ctx: GatewayContext,
    hub: RealtimeHub,
    shutdown: Arc<ShutdownCoordinator>,
    sessions: TaskTracker,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RoomcastServer {
    /// Build a server from its config and collaborators.
    pub fn new(config: ServerConfig, deps: ServerDeps) -> Self {
        let ctx = GatewayContext::new(deps.directory, deps.resolver, deps.chat_sink);
        let notifications =
            NotificationService::new(Arc::clone(&ctx.registry), deps.preferences, deps.email);
        let hub = RealtimeHub::new(Arc::clone(&ctx.registry), notifications);
        Self {
            config: Arc::new(config),
            ctx,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            sessions: TaskTracker::new(),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from an installed recorder.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Router with the socket endpoint, `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            sessions: self.sessions.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };
        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr()).await
    }

    /// Serve until shutdown is triggered, then let open sockets close.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.config.path, "roomcast gateway listening");
        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        let _ = self.sessions.close();
        if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, self.sessions.wait())
            .await
            .is_err()
        {
            warn!(open = self.sessions.len(), "sessions still open after drain timeout");
        }
        info!("roomcast gateway stopped");
        Ok(())
    }

    /// Emit API for the CRUD layer.
    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    /// Membership registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.ctx.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET {path}: WebSocket upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_draining() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let principal = state.ctx.resolver.resolve(&headers);
    let connection_id = ConnectionId::new();
    let token = state.shutdown.token();
    let AppState {
        ctx,
        config,
        sessions,
        ..
    } = state;
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| {
            sessions.track_future(run_ws_session(
                socket,
                connection_id,
                principal,
                ctx,
                config,
                token,
            ))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.ctx.registry;
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.room_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
