//! Production socket over `tokio-tungstenite`.

use std::sync::Arc;

use async_lock::Mutex;
use futures::{
    future::BoxFuture,
    stream::SplitSink,
    FutureExt, SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use super::{Frames, Socket, SocketConnector, SocketError};

type Sink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Opens sockets with [`connect_async`].
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

struct TungsteniteSocket {
    sink: Mutex<Sink>,
}

impl Socket for TungsteniteSocket {
    fn send_text(&self, text: String) -> BoxFuture<'_, Result<(), SocketError>> {
        async move {
            self.sink
                .lock()
                .await
                .send(Message::text(text))
                .await
                .map_err(|err| SocketError::Io(err.to_string()))
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if let Err(err) = self.sink.lock().await.close().await {
                tracing::debug!(%err, "socket close failed");
            }
        }
        .boxed()
    }
}

impl SocketConnector for TungsteniteConnector {
    fn connect(
        &self,
        url: Url,
    ) -> BoxFuture<'_, Result<(Arc<dyn Socket>, Frames), SocketError>> {
        async move {
            tracing::debug!(%url, "opening socket");
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|err| SocketError::Io(err.to_string()))?;
            let (sink, stream) = stream.split();

            // Ping frames are answered inside the stream; only text
            // and closure are surfaced.
            let frames: Frames = stream
                .filter_map(|item| async move {
                    match item {
                        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                        Ok(Message::Close(_)) => Some(Err(SocketError::Closed)),
                        Ok(_) => None,
                        Err(err) => Some(Err(SocketError::Io(err.to_string()))),
                    }
                })
                .boxed();

            let socket: Arc<dyn Socket> = Arc::new(TungsteniteSocket {
                sink: Mutex::new(sink),
            });
            Ok((socket, frames))
        }
        .boxed()
    }
}
