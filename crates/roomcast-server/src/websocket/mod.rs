//! WebSocket connection state, room membership, request handling, and the
//! per-socket session loop.

pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
