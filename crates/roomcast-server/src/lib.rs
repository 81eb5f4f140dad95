//! # roomcast-server
//!
//! Axum WebSocket gateway for the realtime layer.
//!
//! - `GET /socket.io`: WebSocket upgrade, one [`ClientConnection`] per socket
//! - Room Membership Registry: authorized, idempotent joins; purge on teardown
//! - Event fan-out: envelopes delivered to every member of the target room,
//!   dropping (never blocking on) saturated or dead connections
//! - [`RealtimeHub`]: emit API for the CRUD layer, chat membership changes
//! - Notification fan-out gated by per-user preferences
//! - `GET /health`, `GET /metrics`, graceful shutdown
//!
//! [`ClientConnection`]: websocket::connection::ClientConnection
//! [`RealtimeHub`]: hub::RealtimeHub

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod context;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod notify;
pub mod server;
pub mod shutdown;
pub mod websocket;
