//! Socket capability traits.

#[cfg(feature = "tungstenite")]
mod tungstenite;

#[cfg(feature = "tungstenite")]
pub use tungstenite::TungsteniteConnector;

use std::sync::Arc;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use url::Url;

/// Problem on the socket itself.
#[derive(Debug, Clone, Error)]
pub enum SocketError {
    /// The peer closed the socket.
    #[error("socket closed")]
    Closed,

    /// The socket failed at the I/O level.
    #[error("socket error: {0}")]
    Io(String),
}

/// Inbound text frames, ending when the socket does.
pub type Frames = BoxStream<'static, Result<String, SocketError>>;

/// The sending half of one open socket.
pub trait Socket: Send + Sync + 'static {
    /// Send one text frame.
    fn send_text(&self, text: String) -> BoxFuture<'_, Result<(), SocketError>>;

    /// Close the socket. Best effort; never fails.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens sockets.
pub trait SocketConnector: Send + Sync + 'static {
    /// Open a socket to `url` and hand back its sending half and its
    /// inbound frame stream.
    fn connect(
        &self,
        url: Url,
    ) -> BoxFuture<'_, Result<(Arc<dyn Socket>, Frames), SocketError>>;
}
