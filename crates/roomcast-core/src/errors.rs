//! Error taxonomy of the realtime layer.
//!
//! Only `AuthorizationDenied` is ever surfaced to application code; transport
//! failures are recovered by reconnect + rehydrate, and handler errors and
//! delivery drops are logged and swallowed.

use crate::room::RoomKey;

// ── Error code constants ────────────────────────────────────────────

/// Network-level failure; triggers backoff reconnect.
pub const TRANSPORT_FAILURE: &str = "TRANSPORT_FAILURE";
/// Join rejected by the room authorization check.
pub const AUTHORIZATION_DENIED: &str = "AUTHORIZATION_DENIED";
/// An application handler failed while processing an envelope.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
/// Fan-out to a dead or saturated connection was dropped.
pub const DELIVERY_DROP: &str = "DELIVERY_DROP";
/// Frame could not be parsed or named an unknown event.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// The connection was already torn down.
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";

/// Realtime error type shared by server and client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// Transport could not be opened or failed mid-stream.
    #[error("transport failure: {reason}")]
    TransportFailure {
        /// Underlying cause.
        reason: String,
    },

    /// The principal may not join the room.
    #[error("not authorized for {room}: {reason}")]
    AuthorizationDenied {
        /// Room the join targeted.
        room: RoomKey,
        /// Why the join was denied.
        reason: String,
    },

    /// A dispatched handler returned an error or panicked.
    #[error("handler for {event} failed: {message}")]
    HandlerError {
        /// Event being dispatched.
        event: String,
        /// Description.
        message: String,
    },

    /// Best-effort delivery to a connection was dropped.
    #[error("delivery to {connection_id} dropped")]
    DeliveryDrop {
        /// Recipient connection.
        connection_id: String,
    },

    /// Malformed frame or unknown event.
    #[error("{message}")]
    InvalidFrame {
        /// Description.
        message: String,
    },

    /// The connection has already been torn down.
    #[error("connection closed")]
    ConnectionClosed,
}

impl RealtimeError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportFailure { .. } => TRANSPORT_FAILURE,
            Self::AuthorizationDenied { .. } => AUTHORIZATION_DENIED,
            Self::HandlerError { .. } => HANDLER_ERROR,
            Self::DeliveryDrop { .. } => DELIVERY_DROP,
            Self::InvalidFrame { .. } => INVALID_PARAMS,
            Self::ConnectionClosed => CONNECTION_CLOSED,
        }
    }

    /// Shorthand for a denial.
    pub fn denied(room: &RoomKey, reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            room: room.clone(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a transport failure.
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::TransportFailure {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_per_variant() {
        let room = RoomKey::project("p1");
        assert_eq!(RealtimeError::denied(&room, "x").code(), AUTHORIZATION_DENIED);
        assert_eq!(RealtimeError::transport("reset").code(), TRANSPORT_FAILURE);
        assert_eq!(
            RealtimeError::HandlerError {
                event: "task:updated".into(),
                message: "boom".into(),
            }
            .code(),
            HANDLER_ERROR
        );
        assert_eq!(
            RealtimeError::DeliveryDrop {
                connection_id: "c1".into()
            }
            .code(),
            DELIVERY_DROP
        );
        assert_eq!(
            RealtimeError::InvalidFrame {
                message: "bad".into()
            }
            .code(),
            INVALID_PARAMS
        );
        assert_eq!(RealtimeError::ConnectionClosed.code(), CONNECTION_CLOSED);
    }

    #[test]
    fn denial_message_names_room() {
        let err = RealtimeError::denied(&RoomKey::chat_channel("42"), "not a member");
        assert_eq!(err.to_string(), "not authorized for chatChannel:42: not a member");
    }
}
