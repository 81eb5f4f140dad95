//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup before anything is recorded. Fails if another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text exposition.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections closed for heartbeat silence (counter).
pub const WS_HEARTBEAT_TIMEOUTS_TOTAL: &str = "ws_heartbeat_timeouts_total";
/// Room joins accepted (counter, labels: room_type).
pub const ROOM_JOINS_TOTAL: &str = "room_joins_total";
/// Room joins denied (counter, labels: room_type).
pub const ROOM_JOIN_DENIALS_TOTAL: &str = "room_join_denials_total";
/// Rooms with at least one member (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
/// Envelopes fanned out (counter, labels: room_type).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Per-connection deliveries dropped (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";
/// Notifications created (counter, labels: category, pushed).
pub const NOTIFICATIONS_TOTAL: &str = "notifications_total";
/// Notification emails that failed (counter).
pub const NOTIFICATION_EMAIL_FAILURES_TOTAL: &str = "notification_email_failures_total";
