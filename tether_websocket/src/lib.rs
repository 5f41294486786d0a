//! # Tether WebSocket
//!
//! Full-duplex socket transport for the Tether persistent-connection
//! client. Frames arrive and leave over one socket; negotiation and
//! the abort notification still ride plain HTTP.
//!
//! The socket itself is a capability: [`SocketConnector`] opens one,
//! [`Socket`] sends on it, and inbound frames arrive as a stream. The
//! `tungstenite` feature supplies a production implementation over
//! `tokio-tungstenite`; tests script their own.

mod socket;
mod transport;

pub use socket::{Frames, Socket, SocketConnector, SocketError};
pub use transport::WebSocketTransport;

#[cfg(feature = "tungstenite")]
pub use socket::TungsteniteConnector;

/// Pause between reconnect attempts after a dropped socket (2 seconds).
pub const DEFAULT_RECONNECT_PAUSE_SECS: u64 = 2;
