//! Error types for the connection core and its transports.
//!
//! Errors that are both returned to the caller and broadcast through
//! the error event are `Clone`; non-clonable sources are wrapped in
//! [`Arc`].

use std::sync::Arc;

use thiserror::Error;

use crate::http::HttpError;

/// Problem surfaced by the connection itself.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// `send` was called while the connection was disconnected.
    #[error("connection has not been started")]
    NotStarted,

    /// `send` was called before the start sequence completed.
    #[error("connection has not been fully established")]
    NotEstablished,

    /// The server speaks a different protocol version. Fatal; never retried.
    #[error("protocol version mismatch: client {client}, server {server}")]
    ProtocolMismatch {
        /// Version this client speaks.
        client: String,
        /// Version the server reported.
        server: String,
    },

    /// The negotiate exchange failed before a session existed.
    #[error("negotiation failed: {0}")]
    Negotiation(TransportError),

    /// The transport failed to establish its data channel.
    #[error("transport failed to start: {0}")]
    StartFailed(TransportError),

    /// A transport operation failed after the session was established.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

/// Problem inside a transport operation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The underlying HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(Arc<HttpError>),

    /// The server returned a non-success status.
    #[error("server returned HTTP {0}")]
    Status(u16),

    /// A server payload could not be decoded.
    #[error("failed to decode server payload: {0}")]
    Decode(Arc<serde_json::Error>),

    /// The operation did not complete within its window.
    #[error("operation timed out")]
    Timeout,

    /// The transport was aborted by a concurrent stop.
    #[error("transport aborted")]
    Aborted,

    /// No data channel is currently open.
    #[error("no transport channel is active")]
    NotConnected,

    /// Every transport candidate failed to negotiate or start.
    #[error("no transport candidate could be started")]
    NoTransportAvailable,

    /// The underlying socket failed.
    #[error("socket error: {0}")]
    Socket(String),
}

impl From<HttpError> for TransportError {
    fn from(err: HttpError) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_errors_display() {
        assert_eq!(
            format!("{}", ConnectionError::NotStarted),
            "connection has not been started"
        );
        assert_eq!(
            format!("{}", ConnectionError::NotEstablished),
            "connection has not been fully established"
        );
    }

    #[test]
    fn protocol_mismatch_names_both_versions() {
        let err = ConnectionError::ProtocolMismatch {
            client: "1.4".into(),
            server: "2.0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "protocol version mismatch: client 1.4, server 2.0"
        );
    }

    #[test]
    fn transport_errors_are_clone() {
        let err = TransportError::from(HttpError::Timeout);
        let copy = err.clone();
        assert_eq!(format!("{err}"), format!("{copy}"));
    }
}
