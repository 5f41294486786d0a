//! The WebSocket transport.
//!
//! One tokio task owns the socket session: it consumes inbound frames,
//! feeds them to the connection, and on a dropped socket runs the
//! reconnect loop against the `reconnect` endpoint until the socket is
//! back, the transport is aborted, or the watchdog kills the
//! connection. The abort flag is checked after every await; once set,
//! nothing reschedules.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_lock::Mutex;
use futures::{channel::oneshot, future::BoxFuture, FutureExt, StreamExt};
use tokio::task::JoinHandle;
use url::Url;

use tether_core::{
    connection::{ConnectionState, PersistentConnection, TimerPurpose},
    error::TransportError,
    http::HttpClient,
    protocol::{NegotiationResponse, ReceivedEnvelope},
    transport::{self, urls, Transport, TransportKind},
};

use crate::{
    socket::{Frames, Socket, SocketConnector},
    DEFAULT_RECONNECT_PAUSE_SECS,
};

/// Full-duplex transport over any [`SocketConnector`], with
/// negotiation and the abort notification over any [`HttpClient`].
pub struct WebSocketTransport<H: HttpClient> {
    http: H,
    connector: Arc<dyn SocketConnector>,
    reconnect_pause: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    aborted: AtomicBool,
    socket: Mutex<Option<Arc<dyn Socket>>>,
    session_task: Mutex<Option<JoinHandle<()>>>,
    start_tx: Mutex<Option<oneshot::Sender<Result<(), TransportError>>>>,
}

impl Shared {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn resolve_start(&self, result: Result<(), TransportError>) {
        if let Some(tx) = self.start_tx.lock_blocking().take() {
            let _ = tx.send(result);
        }
    }
}

impl<H: HttpClient> WebSocketTransport<H> {
    /// Transport over the production socket implementation.
    #[cfg(feature = "tungstenite")]
    #[must_use]
    pub fn new(http: H) -> Self {
        Self::with_connector(http, crate::TungsteniteConnector)
    }

    /// Transport over a caller-supplied socket implementation.
    #[must_use]
    pub fn with_connector(http: H, connector: impl SocketConnector) -> Self {
        Self {
            http,
            connector: Arc::new(connector),
            reconnect_pause: Duration::from_secs(DEFAULT_RECONNECT_PAUSE_SECS),
            shared: Arc::new(Shared {
                aborted: AtomicBool::new(false),
                socket: Mutex::new(None),
                session_task: Mutex::new(None),
                start_tx: Mutex::new(None),
            }),
        }
    }

    /// Override the pause between reconnect attempts.
    #[must_use]
    pub fn reconnect_pause(mut self, pause: Duration) -> Self {
        self.reconnect_pause = pause;
        self
    }
}

impl<H: HttpClient> Transport for WebSocketTransport<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }

    fn supports_keep_alive(&self) -> bool {
        true
    }

    fn negotiate<'a>(
        &'a self,
        connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<NegotiationResponse, TransportError>> {
        transport::negotiate(&self.http, connection).boxed()
    }

    fn start<'a>(
        &'a self,
        connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            self.shared.aborted.store(false, Ordering::SeqCst);

            let (tx, rx) = oneshot::channel();
            *self.shared.start_tx.lock_blocking() = Some(tx);

            let url = socket_url(urls::connect(connection, TransportKind::WebSockets))?;
            let (socket, frames) = self
                .connector
                .connect(url)
                .await
                .map_err(|err| TransportError::Socket(err.to_string()))?;
            *self.shared.socket.lock_blocking() = Some(socket);

            let handle = tokio::spawn(run_session(
                self.connector.clone(),
                connection.clone(),
                self.shared.clone(),
                frames,
                self.reconnect_pause,
            ));
            if let Some(old) = self.shared.session_task.lock_blocking().replace(handle) {
                old.abort();
            }

            match rx.await {
                Ok(result) => result,
                Err(_canceled) => Err(TransportError::Aborted),
            }
        }
        .boxed()
    }

    fn send<'a>(
        &'a self,
        _connection: &'a PersistentConnection,
        data: String,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let Some(socket) = self.shared.socket.lock_blocking().clone() else {
                return Err(TransportError::NotConnected);
            };
            socket
                .send_text(data)
                .await
                .map_err(|err| TransportError::Socket(err.to_string()))
        }
        .boxed()
    }

    fn abort<'a>(
        &'a self,
        connection: &'a PersistentConnection,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, ()> {
        async move {
            if self.shared.aborted.swap(true, Ordering::SeqCst) {
                return;
            }
            self.shared.resolve_start(Err(TransportError::Aborted));
            if let Some(task) = self.shared.session_task.lock_blocking().take() {
                task.abort();
            }
            if let Some(socket) = self.shared.socket.lock_blocking().take() {
                socket.close().await;
            }
            if let Some(timeout) = timeout {
                transport::notify_abort(
                    &self.http,
                    connection,
                    TransportKind::WebSockets,
                    timeout,
                )
                .await;
            }
        }
        .boxed()
    }

    /// Closing the socket wakes the session task, which runs the
    /// reconnect loop.
    fn lost_connection(&self, connection: &PersistentConnection) {
        connection.ensure_reconnecting();
        if let Some(socket) = self.shared.socket.lock_blocking().clone() {
            tokio::spawn(async move { socket.close().await });
        }
    }
}

enum SessionEnd {
    /// The connection is done for good; do not reconnect.
    Terminal,
    /// The socket dropped out from under a live connection.
    Lost,
}

async fn run_session(
    connector: Arc<dyn SocketConnector>,
    connection: PersistentConnection,
    shared: Arc<Shared>,
    mut frames: Frames,
    pause: Duration,
) {
    tracing::debug!("socket session started");

    loop {
        match consume(&connection, &shared, &mut frames).await {
            SessionEnd::Terminal => break,
            SessionEnd::Lost => {}
        }
        if shared.is_aborted() {
            break;
        }
        if let Some(socket) = shared.socket.lock_blocking().take() {
            socket.close().await;
        }

        // A drop before initialization fails the pending start instead
        // of entering the reconnect loop.
        shared.resolve_start(Err(TransportError::Socket(
            "socket closed before initialization".into(),
        )));

        match reconnect(&*connector, &connection, &shared, pause).await {
            Some(next) => frames = next,
            None => break,
        }
    }

    tracing::debug!("socket session exited");
}

async fn consume(
    connection: &PersistentConnection,
    shared: &Shared,
    frames: &mut Frames,
) -> SessionEnd {
    while let Some(item) = frames.next().await {
        if shared.is_aborted() {
            return SessionEnd::Terminal;
        }
        match item {
            Ok(text) => match ReceivedEnvelope::decode(&text) {
                Ok(Some(envelope)) => {
                    if envelope.initialized.is_some() {
                        tracing::debug!("data channel initialized");
                        shared.resolve_start(Ok(()));
                        // Hold until the start sequence finishes its
                        // transition; everything past the init frame must
                        // land on an established connection.
                        while connection.state() == ConnectionState::Connecting
                            && !shared.is_aborted()
                        {
                            tokio::time::sleep(Duration::from_millis(2)).await;
                        }
                        if shared.is_aborted() {
                            return SessionEnd::Terminal;
                        }
                    }
                    let outcome = connection.process_response(&envelope);
                    if outcome.disconnected {
                        connection.disconnect();
                        return SessionEnd::Terminal;
                    }
                    if outcome.should_reconnect {
                        tracing::info!("server requested a reconnect");
                        return SessionEnd::Lost;
                    }
                }
                Ok(None) => connection.touch_keep_alive(),
                Err(err) => connection.report_transport_error(err.into()),
            },
            Err(err) => {
                connection.report_transport_error(TransportError::Socket(err.to_string()));
                return SessionEnd::Lost;
            }
        }
    }
    // Stream end without a close error still means the socket is gone.
    SessionEnd::Lost
}

/// Reopen the socket against the `reconnect` endpoint until it is
/// back, the transport is aborted, or the connection leaves its grace
/// period.
async fn reconnect(
    connector: &dyn SocketConnector,
    connection: &PersistentConnection,
    shared: &Shared,
    pause: Duration,
) -> Option<Frames> {
    loop {
        if shared.is_aborted() {
            return None;
        }
        if !connection.ensure_reconnecting() {
            return None;
        }

        let wait = connection.timers().delay(TimerPurpose::ErrorDelay, pause);
        if wait.await.is_err() {
            // Canceled by teardown.
            return None;
        }
        if shared.is_aborted() {
            return None;
        }

        let url = match socket_url(urls::reconnect(connection, TransportKind::WebSockets)) {
            Ok(url) => url,
            Err(err) => {
                connection.report_transport_error(err);
                return None;
            }
        };

        match connector.connect(url).await {
            Ok((socket, frames)) => {
                *shared.socket.lock_blocking() = Some(socket);
                if connection
                    .change_state(ConnectionState::Reconnecting, ConnectionState::Connected)
                {
                    connection.did_reconnect();
                }
                return Some(frames);
            }
            Err(err) => {
                tracing::warn!(%err, "socket reconnect attempt failed");
                connection.report_transport_error(TransportError::Socket(err.to_string()));
            }
        }
    }
}

/// Convert the HTTP endpoint URL into its socket counterpart.
fn socket_url(mut url: Url) -> Result<Url, TransportError> {
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => {
            return Err(TransportError::Socket(format!(
                "unsupported scheme: {other}"
            )))
        }
    };
    if url.set_scheme(scheme).is_err() {
        return Err(TransportError::Socket("scheme conversion failed".into()));
    }
    Ok(url)
}
