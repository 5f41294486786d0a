//! Typed event registry.
//!
//! One registry carries every notification the connection emits. Two
//! subscription styles feed off the same dispatch path: ad hoc
//! closures registered per event (or for the whole stream), and a
//! structured [`ConnectionDelegate`]. Every event reaches both.

use async_lock::RwLock;

use crate::error::ConnectionError;

use super::state::ConnectionState;

/// Everything a connection can tell the application.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The start sequence completed and the connection is live.
    Started,
    /// One inbound payload (or a full result-bearing envelope).
    Received(serde_json::Value),
    /// Something went wrong; see the error taxonomy.
    Error(ConnectionError),
    /// The connection reached `Disconnected`.
    Closed,
    /// The connection entered its reconnect grace period.
    Reconnecting,
    /// The connection recovered without a full renegotiation.
    Reconnected,
    /// A guarded state transition was applied.
    StateChanged(ConnectionState),
    /// Keep-alive data is stale but not yet past the lost threshold.
    Slow,
}

/// Structured observer for connection events.
///
/// Every method has a no-op default, so implementers pick only the
/// hooks they care about.
pub trait ConnectionDelegate: Send + Sync {
    /// The connection is live.
    fn on_started(&self) {}
    /// One inbound payload arrived.
    fn on_received(&self, _data: &serde_json::Value) {}
    /// An error surfaced.
    fn on_error(&self, _err: &ConnectionError) {}
    /// The connection closed.
    fn on_closed(&self) {}
    /// The connection entered its reconnect grace period.
    fn on_reconnecting(&self) {}
    /// The connection recovered.
    fn on_reconnected(&self) {}
    /// A state transition was applied.
    fn on_state_changed(&self, _state: ConnectionState) {}
    /// The connection looks slow.
    fn on_slow(&self) {}
}

type Handler = Box<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// The single dispatch point for all notifications.
///
/// Closure handlers fire in registration order, then the delegate —
/// on the same logical turn that performed the triggering transition.
#[derive(Default)]
pub(crate) struct EventRegistry {
    handlers: RwLock<Vec<Handler>>,
    delegate: RwLock<Option<std::sync::Arc<dyn ConnectionDelegate>>>,
}

impl EventRegistry {
    pub(crate) fn subscribe(&self, handler: Handler) {
        self.handlers.write_blocking().push(handler);
    }

    pub(crate) fn set_delegate(&self, delegate: std::sync::Arc<dyn ConnectionDelegate>) {
        *self.delegate.write_blocking() = Some(delegate);
    }

    pub(crate) fn emit(&self, event: &ConnectionEvent) {
        for handler in self.handlers.read_blocking().iter() {
            handler(event);
        }
        let delegate = self.delegate.read_blocking().clone();
        if let Some(delegate) = delegate {
            dispatch(&*delegate, event);
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry").finish_non_exhaustive()
    }
}

fn dispatch(delegate: &dyn ConnectionDelegate, event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Started => delegate.on_started(),
        ConnectionEvent::Received(data) => delegate.on_received(data),
        ConnectionEvent::Error(err) => delegate.on_error(err),
        ConnectionEvent::Closed => delegate.on_closed(),
        ConnectionEvent::Reconnecting => delegate.on_reconnecting(),
        ConnectionEvent::Reconnected => delegate.on_reconnected(),
        ConnectionEvent::StateChanged(state) => delegate.on_state_changed(*state),
        ConnectionEvent::Slow => delegate.on_slow(),
    }
}
