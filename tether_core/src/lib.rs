//! # Tether Core
//!
//! Client core for a persistent-connection messaging protocol:
//! negotiate → connect → stream → reconnect → disconnect.
//!
//! This crate owns the pieces every transport shares:
//!
//! - [`connection::PersistentConnection`] — connection identity, the
//!   lifecycle state machine, and the event surface
//! - [`transport::Transport`] — the capability contract concrete
//!   transports implement
//! - the heartbeat monitor and the reconnection timers that decide
//!   whether a quiet connection is slow, recoverable, or dead
//!
//! Concrete transports live in sibling crates
//! (`tether_http_long_poll`, `tether_websocket`).

pub mod connection;
pub mod error;
pub mod http;
pub mod protocol;
pub mod transport;

/// Protocol version this client speaks.
///
/// Negotiation fails fast on any mismatch; a version difference is
/// unrecoverable and is never retried.
pub const CLIENT_PROTOCOL_VERSION: &str = "1.4";

/// Default disconnect timeout until negotiation supplies one (30 seconds).
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 30;

/// Default transport connect timeout until negotiation supplies one (5 seconds).
pub const DEFAULT_TRANSPORT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default server-notification window for [`connection::PersistentConnection::stop`]
/// (30 seconds).
pub const DEFAULT_ABORT_TIMEOUT_SECS: u64 = 30;
