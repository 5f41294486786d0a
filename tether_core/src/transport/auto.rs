//! Automatic transport selection.
//!
//! Tries a caller-supplied candidate list in order and settles on the
//! first transport whose data channel comes up. Once selected, every
//! operation delegates to that transport; the candidates themselves
//! decide what "coming up" means.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_lock::Mutex;
use futures::{future::BoxFuture, FutureExt};

use crate::{
    connection::PersistentConnection,
    error::TransportError,
    protocol::NegotiationResponse,
};

use super::{Transport, TransportKind};

/// Falls back through an ordered list of transport candidates.
///
/// WebSocket candidates are skipped when negotiation reports the
/// server cannot support them.
pub struct AutoTransport {
    candidates: Vec<Arc<dyn Transport>>,
    selected: Mutex<Option<Arc<dyn Transport>>>,
    try_web_sockets: AtomicBool,
}

impl AutoTransport {
    /// Selection over `candidates`, tried in the given order.
    #[must_use]
    pub fn new(candidates: Vec<Arc<dyn Transport>>) -> Self {
        Self {
            candidates,
            selected: Mutex::new(None),
            try_web_sockets: AtomicBool::new(true),
        }
    }

    /// The transport that ended up carrying the connection, once one has.
    #[must_use]
    pub fn selected(&self) -> Option<Arc<dyn Transport>> {
        self.selected.lock_blocking().clone()
    }
}

impl Transport for AutoTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Auto
    }

    fn supports_keep_alive(&self) -> bool {
        self.selected()
            .is_some_and(|transport| transport.supports_keep_alive())
    }

    fn negotiate<'a>(
        &'a self,
        connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<NegotiationResponse, TransportError>> {
        async move {
            let mut last = TransportError::NoTransportAvailable;
            for candidate in &self.candidates {
                match candidate.negotiate(connection).await {
                    Ok(negotiation) => {
                        self.try_web_sockets
                            .store(negotiation.try_web_sockets, Ordering::SeqCst);
                        return Ok(negotiation);
                    }
                    Err(err) => {
                        tracing::warn!(transport = %candidate.kind(), %err, "negotiate failed, falling back");
                        last = err;
                    }
                }
            }
            Err(last)
        }
        .boxed()
    }

    fn start<'a>(
        &'a self,
        connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let try_web_sockets = self.try_web_sockets.load(Ordering::SeqCst);

            for candidate in &self.candidates {
                let kind = candidate.kind();
                if kind == TransportKind::WebSockets && !try_web_sockets {
                    tracing::debug!("server ruled out webSockets, skipping candidate");
                    continue;
                }

                match candidate.start(connection).await {
                    Ok(()) => {
                        tracing::info!(transport = %kind, "transport selected");
                        *self.selected.lock_blocking() = Some(candidate.clone());
                        return Ok(());
                    }
                    Err(err) => {
                        tracing::warn!(transport = %kind, %err, "candidate failed, falling back");
                    }
                }
            }

            Err(TransportError::NoTransportAvailable)
        }
        .boxed()
    }

    fn send<'a>(
        &'a self,
        connection: &'a PersistentConnection,
        data: String,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let Some(transport) = self.selected() else {
                return Err(TransportError::NotConnected);
            };
            transport.send(connection, data).await
        }
        .boxed()
    }

    fn abort<'a>(
        &'a self,
        connection: &'a PersistentConnection,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, ()> {
        async move {
            if let Some(transport) = self.selected.lock_blocking().take() {
                transport.abort(connection, timeout).await;
            }
        }
        .boxed()
    }

    fn lost_connection(&self, connection: &PersistentConnection) {
        if let Some(transport) = self.selected() {
            transport.lost_connection(connection);
        }
    }
}
