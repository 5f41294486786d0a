//! Transport capability contract.
//!
//! A [`Transport`] owns one data channel to the server and nothing
//! else: connection identity, lifecycle state, and event dispatch stay
//! with the [`PersistentConnection`], which transports talk back to
//! through [`PersistentConnection::process_response`] and the
//! reconnection hooks.
//!
//! [`PersistentConnection::process_response`]: crate::connection::PersistentConnection::process_response

mod auto;
mod negotiate;
pub mod urls;

pub use auto::AutoTransport;
pub use negotiate::{negotiate, notify_abort, send_over_http};

use std::{fmt, time::Duration};

use futures::future::BoxFuture;

use crate::{
    connection::PersistentConnection,
    error::TransportError,
    protocol::NegotiationResponse,
};

/// The transports the protocol defines, by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Repeated held HTTP requests.
    LongPolling,
    /// One held HTTP response streaming events.
    ServerSentEvents,
    /// A full-duplex socket.
    WebSockets,
    /// Try the candidates in order, settle on the first that connects.
    Auto,
}

impl TransportKind {
    /// The name this transport goes by in request query strings.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::LongPolling => "longPolling",
            Self::ServerSentEvents => "serverSentEvents",
            Self::WebSockets => "webSockets",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One data channel to the server.
///
/// Implementations are driven by the connection and must be safe to
/// call from its serialized lifecycle turns. Every inbound frame a
/// transport decodes goes through
/// [`PersistentConnection::process_response`]; connectivity loss goes
/// through [`lost_connection`](Self::lost_connection).
///
/// [`PersistentConnection::process_response`]: crate::connection::PersistentConnection::process_response
pub trait Transport: Send + Sync + 'static {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Whether the connection should run the heartbeat monitor on this
    /// transport's behalf. Transports that detect liveness themselves
    /// return `false`.
    fn supports_keep_alive(&self) -> bool;

    /// Run the negotiate exchange and return the server's session
    /// parameters.
    fn negotiate<'a>(
        &'a self,
        connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<NegotiationResponse, TransportError>>;

    /// Establish the data channel. Resolves once the server has
    /// acknowledged initialization; the connection bounds this with the
    /// negotiated connect timeout.
    fn start<'a>(
        &'a self,
        connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Send one application payload.
    fn send<'a>(
        &'a self,
        connection: &'a PersistentConnection,
        data: String,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Tear the data channel down. `Some(timeout)` bounds a best-effort
    /// server notification; `None` skips it. Never fails: abort must
    /// succeed locally regardless of what the server does.
    fn abort<'a>(
        &'a self,
        connection: &'a PersistentConnection,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, ()>;

    /// React to a detected connectivity loss (transport-observed or
    /// reported by the heartbeat monitor). Must not block: kick off
    /// recovery and return.
    fn lost_connection(&self, connection: &PersistentConnection);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_the_protocol() {
        assert_eq!(TransportKind::LongPolling.wire_name(), "longPolling");
        assert_eq!(TransportKind::ServerSentEvents.wire_name(), "serverSentEvents");
        assert_eq!(TransportKind::WebSockets.wire_name(), "webSockets");
        assert_eq!(TransportKind::Auto.wire_name(), "auto");
    }
}
