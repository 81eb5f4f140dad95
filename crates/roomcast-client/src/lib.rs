//! # roomcast-client
//!
//! Client side of the realtime layer, one [`ClientSession`] per signed-in
//! session:
//!
//! - [`Connection`]: one auto-reconnecting channel with capped backoff
//! - [`RoomTracker`]: the room ledger; idempotent joins and rehydration
//! - [`Dispatcher`]: typed, room-scoped handler registration with RAII
//!   [`Subscription`]s
//! - [`InvalidationDispatcher`]: turns server events into cache keys to refetch
//! - [`AccessRevocationEnforcer`]: reacts to the local user's removal from a chat
//!
//! [`ClientSession`]: session::ClientSession
//! [`Connection`]: connection::Connection
//! [`RoomTracker`]: tracker::RoomTracker
//! [`Dispatcher`]: dispatch::Dispatcher
//! [`Subscription`]: dispatch::Subscription
//! [`InvalidationDispatcher`]: invalidation::InvalidationDispatcher
//! [`AccessRevocationEnforcer`]: revocation::AccessRevocationEnforcer

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod invalidation;
pub mod revocation;
pub mod session;
pub mod tracker;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, ConnectionEvent};
pub use dispatch::{Dispatcher, Priority, Subscription};
pub use invalidation::{CacheInvalidator, CacheKey, InvalidationDispatcher, StaleSet};
pub use revocation::{AccessRevocationEnforcer, LocalView, Notice, NoticeKind, ViewState};
pub use session::{ClientSession, SessionContext, SessionOptions, SessionSignal};
pub use tracker::{FrameSink, RoomTracker};
pub use transport::{Connector, Transport, WsConnector};
