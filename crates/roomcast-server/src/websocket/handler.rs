//! Inbound frame dispatch: joins, leaves and `chat:send`.

use std::sync::Arc;

use metrics::counter;
use roomcast_core::events::CHAT_NEW_MESSAGE;
use roomcast_core::protocol::{iso_timestamp, ChatMessagePayload, ChatSendPayload, RoomErrorPayload};
use roomcast_core::{ClientRequest, MessageId, RealtimeError, RoomKey, ServerFrame};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::auth::authorize;
use crate::context::GatewayContext;
use crate::metrics::{ROOM_JOINS_TOTAL, ROOM_JOIN_DENIALS_TOTAL};

/// Handle one inbound text frame.
///
/// Returns the frame to send back to this connection, if any. Only failures
/// produce a reply (`room:error`); successful joins and leaves are silent.
#[instrument(skip_all, fields(conn_id = %connection.id, event))]
pub async fn handle_message(
    text: &str,
    connection: &Arc<ClientConnection>,
    ctx: &GatewayContext,
) -> Option<ServerFrame> {
    let request = match ClientRequest::from_json(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "rejected client frame");
            return Some(RoomErrorPayload::from_error(&e, None).into_frame());
        }
    };
    let event = request.event_name();
    let _ = tracing::Span::current().record("event", event);

    let result = match request {
        ClientRequest::ChatSend(payload) => send_chat(connection, payload, ctx).await,
        req if req.is_join() => join(connection, &req.room(), ctx).await,
        req => {
            leave(connection, &req.room(), ctx);
            Ok(())
        }
    };
    result
        .err()
        .map(|e| RoomErrorPayload::from_error(&e, None).for_request(event).into_frame())
}

async fn join(
    connection: &Arc<ClientConnection>,
    room: &RoomKey,
    ctx: &GatewayContext,
) -> Result<(), RealtimeError> {
    if let Err(e) = authorize(connection.principal(), room, ctx.directory.as_ref()).await {
        info!(room = %room, error = %e, "join denied");
        counter!(ROOM_JOIN_DENIALS_TOTAL, "room_type" => room.room_type.as_str()).increment(1);
        return Err(e);
    }
    match ctx.registry.join(connection, room) {
        Ok(true) => {
            debug!(room = %room, "joined room");
            counter!(ROOM_JOINS_TOTAL, "room_type" => room.room_type.as_str()).increment(1);
        }
        Ok(false) => debug!(room = %room, "already in room"),
        // Torn down while authorizing; nobody is left to tell.
        Err(e) => debug!(room = %room, error = %e, "join after close ignored"),
    }
    Ok(())
}

fn leave(connection: &ClientConnection, room: &RoomKey, ctx: &GatewayContext) {
    if ctx.registry.leave(connection, room) {
        debug!(room = %room, "left room");
    } else {
        debug!(room = %room, "leave for room not held");
    }
}

async fn send_chat(
    connection: &Arc<ClientConnection>,
    payload: ChatSendPayload,
    ctx: &GatewayContext,
) -> Result<(), RealtimeError> {
    let room = payload.target_type.room(payload.target_id.clone());
    if payload.body.trim().is_empty() {
        return Err(RealtimeError::InvalidFrame {
            message: "message body is empty".into(),
        });
    }
    if let Err(e) = authorize(connection.principal(), &room, ctx.directory.as_ref()).await {
        info!(room = %room, error = %e, "chat send denied");
        return Err(e);
    }

    let message = json!({
        "id": MessageId::new(),
        "body": payload.body,
        "senderId": connection.user_id(),
        "createdAt": iso_timestamp(chrono::Utc::now()),
    });
    if let Err(e) = ctx.chat_sink.persist(&room, &message).await {
        warn!(room = %room, error = %e, "failed to persist chat message");
    }

    let data = ChatMessagePayload {
        target_type: payload.target_type,
        target_id: payload.target_id,
        message,
    };
    let frame = ServerFrame {
        event: CHAT_NEW_MESSAGE.to_owned(),
        data: serde_json::to_value(&data).unwrap_or_default(),
        room: Some(room.clone()),
    };
    let _ = ctx.registry.broadcast_frame(&room, &frame);
    Ok(())
}
