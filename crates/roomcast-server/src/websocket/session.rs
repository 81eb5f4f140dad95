//! Socket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use roomcast_core::events::CONNECTION_CONNECTED;
use roomcast_core::protocol::ConnectedPayload;
use roomcast_core::{ConnectionId, RoomKey, ServerFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_message;
use crate::auth::Principal;
use crate::config::ServerConfig;
use crate::context::GatewayContext;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HEARTBEAT_TIMEOUTS_TOTAL,
};

/// How long the writer gets to flush a close frame on teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run one socket session.
///
/// 1. Registers the connection and queues `connection:connected`
/// 2. Joins the principal's own notification room
/// 3. Forwards queued frames and pings on a writer task
/// 4. Handles inbound frames in arrival order
/// 5. Purges every membership on exit, whatever the cause
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    principal: Option<Principal>,
    ctx: GatewayContext,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.send_queue.max(1));
    let connection = Arc::new(ClientConnection::with_id(connection_id, principal, send_tx));

    info!(user_id = ?connection.user_id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.registry.register(Arc::clone(&connection));

    let _ = connection.send_frame(&connected_frame(&connection));
    if let Some(user) = connection.user_id() {
        let room = RoomKey::user_notification(user);
        if let Err(e) = ctx.registry.join(&connection, &room) {
            warn!(room = %room, error = %e, "failed to join notification room");
        }
    }

    let done = shutdown.child_token();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        done.clone(),
    ));

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            () = done.cancelled() => break,
        };
        let Some(Ok(msg)) = next else { break };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Some(reply) = handle_message(&text, &connection, &ctx).await {
            if !connection.send_frame(&reply) {
                debug!("failed to enqueue reply (queue full or closed)");
            }
        }
    }

    let purged = ctx.registry.unregister(&connection);
    let lifetime = connection.age().as_secs_f64();
    info!(
        rooms = purged.len(),
        dropped = connection.drop_count(),
        lifetime_secs = lifetime,
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(lifetime);

    done.cancel();
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// The handshake frame sent first on every connection.
pub fn connected_frame(connection: &ClientConnection) -> ServerFrame {
    let payload = ConnectedPayload::now(
        connection.user_id().cloned(),
        connection.tenant_id().cloned(),
    );
    ServerFrame::unscoped(
        CONNECTION_CONNECTED,
        serde_json::to_value(payload).unwrap_or_default(),
    )
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    done: CancellationToken,
) {
    let mut ping = tokio::time::interval(interval);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(text) = msg else { break };
                if sink.send(Message::Text((*text).clone().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > timeout {
                    warn!(timeout_ms = timeout.as_millis(), "client unresponsive, disconnecting");
                    counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    break;
                }
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            () = done.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    done.cancel();
}
