//! The long-polling transport.
//!
//! One tokio task drives the poll loop; the transport itself only
//! starts it, feeds sends through the `send` endpoint, and flips the
//! abort flag. The flag is authoritative: the loop checks it after
//! every await and never reschedules once it is set.

mod poll_loop;

pub(crate) use poll_loop::Timings;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_lock::Mutex;
use futures::{channel::oneshot, future::BoxFuture, FutureExt};
use tokio::task::JoinHandle;

use tether_core::{
    connection::PersistentConnection,
    error::TransportError,
    http::HttpClient,
    protocol::NegotiationResponse,
    transport::{self, Transport, TransportKind},
};

use crate::{
    DEFAULT_ERROR_DELAY_SECS, DEFAULT_POLL_TIMEOUT_SECS, DEFAULT_RECONNECT_DELAY_SECS,
};

/// Long-polling transport over any [`HttpClient`].
pub struct LongPollingTransport<H: HttpClient> {
    http: H,
    timings: Timings,
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    aborted: AtomicBool,
    start_tx: Mutex<Option<oneshot::Sender<Result<(), TransportError>>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolve the pending start future, if one is still waiting.
    pub(crate) fn resolve_start(&self, result: Result<(), TransportError>) {
        if let Some(tx) = self.start_tx.lock_blocking().take() {
            let _ = tx.send(result);
        }
    }
}

impl<H: HttpClient> LongPollingTransport<H> {
    /// Transport with default timings.
    #[must_use]
    pub fn new(http: H) -> Self {
        Self {
            http,
            timings: Timings {
                poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
                reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
                error_delay: Duration::from_secs(DEFAULT_ERROR_DELAY_SECS),
            },
            shared: Arc::new(Shared {
                aborted: AtomicBool::new(false),
                start_tx: Mutex::new(None),
                poll_task: Mutex::new(None),
            }),
        }
    }

    /// Override how long one poll request is held open.
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.timings.poll_timeout = timeout;
        self
    }

    /// Override the reconnect-presumed-successful window.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.timings.reconnect_delay = delay;
        self
    }

    /// Override the pause between a failed request and the retry.
    #[must_use]
    pub fn error_delay(mut self, delay: Duration) -> Self {
        self.timings.error_delay = delay;
        self
    }
}

impl<H: HttpClient> Transport for LongPollingTransport<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    /// Poll responses are themselves the liveness signal; no separate
    /// heartbeat monitoring.
    fn supports_keep_alive(&self) -> bool {
        false
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

            let handle = tokio::spawn(poll_loop::run(
                self.http.clone(),
                connection.clone(),
                self.shared.clone(),
                self.timings,
            ));
            if let Some(old) = self.shared.poll_task.lock_blocking().replace(handle) {
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
        connection: &'a PersistentConnection,
        data: String,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let envelope = transport::send_over_http(
                &self.http,
                connection,
                TransportKind::LongPolling,
                data,
            )
            .await?;

            if let Some(envelope) = envelope {
                let outcome = connection.process_response(&envelope);
                if outcome.disconnected {
                    connection.disconnect();
                }
            }
            Ok(())
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
            if let Some(task) = self.shared.poll_task.lock_blocking().take() {
                task.abort();
            }
            if let Some(timeout) = timeout {
                transport::notify_abort(
                    &self.http,
                    connection,
                    TransportKind::LongPolling,
                    timeout,
                )
                .await;
            }
        }
        .boxed()
    }

    fn lost_connection(&self, connection: &PersistentConnection) {
        connection.ensure_reconnecting();
    }
}
