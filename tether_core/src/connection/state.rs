//! Connection lifecycle states.

use std::fmt;

/// The lifecycle state of a connection.
///
/// Exactly one value holds at any instant; every mutation goes through
/// the guarded compare-and-set transition on
/// [`PersistentConnection::change_state`](super::PersistentConnection::change_state),
/// the only path allowed to notify listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session exists.
    Disconnected,
    /// A start sequence (negotiate → transport start) is in flight.
    Connecting,
    /// The data channel is established.
    Connected,
    /// The connection appears lost but is within its grace period.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}
