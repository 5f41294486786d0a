//! Connection core: identity, lifecycle state machine, and the event
//! surface.
//!
//! [`PersistentConnection`] orchestrates negotiate → start →
//! (send | receive)* → stop against whichever [`Transport`] is active,
//! and wires the heartbeat monitor and the reconnection timers
//! together. Clones share one underlying connection.
//!
//! All shared state lives behind short-lived mutexes that are never
//! held across await points; completion callbacks, state transitions,
//! and event notifications for one connection are serialized.

mod events;
mod heartbeat;
mod identity;
mod state;
mod timers;

pub use events::{ConnectionDelegate, ConnectionEvent};
pub use identity::ConnectionIdentity;
pub use state::ConnectionState;
pub use timers::{TimerPurpose, TimerRegistry};

use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

use async_lock::Mutex;
use tokio::task::JoinHandle;
use url::Url;

use crate::{
    error::{ConnectionError, TransportError},
    protocol::{KeepAliveData, NegotiationResponse, ReceivedEnvelope},
    transport::Transport,
    CLIENT_PROTOCOL_VERSION, DEFAULT_ABORT_TIMEOUT_SECS, DEFAULT_DISCONNECT_TIMEOUT_SECS,
    DEFAULT_TRANSPORT_CONNECT_TIMEOUT_SECS,
};

use events::EventRegistry;

/// Static configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base endpoint URL. A trailing slash is ensured so endpoint
    /// names join cleanly.
    pub url: Url,
    /// Extra query-string pairs appended to every request.
    pub query_string: Vec<(String, String)>,
    /// Initial request headers.
    pub headers: Vec<(String, String)>,
    /// Opaque application payload descriptor forwarded on every request.
    pub connection_data: Option<String>,
    /// Server-notification window used by [`PersistentConnection::stop`].
    pub abort_timeout: Duration,
}

impl ConnectionConfig {
    /// Configuration with defaults for the given endpoint.
    #[must_use]
    pub fn new(mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Self {
            url,
            query_string: Vec::new(),
            headers: Vec::new(),
            connection_data: None,
            abort_timeout: Duration::from_secs(DEFAULT_ABORT_TIMEOUT_SECS),
        }
    }

    /// Append a query-string pair.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_string.push((name.into(), value.into()));
        self
    }

    /// Append an initial request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the connection-data descriptor.
    #[must_use]
    pub fn connection_data(mut self, data: impl Into<String>) -> Self {
        self.connection_data = Some(data.into());
        self
    }
}

/// What a processed envelope asks the transport to do next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// The server asked for a full reconnect.
    pub should_reconnect: bool,
    /// The server requested a disconnect; terminal for the frame and
    /// the connection.
    pub disconnected: bool,
}

pub(crate) struct Inner {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    identity: Mutex<ConnectionIdentity>,
    keep_alive: Mutex<Option<KeepAliveData>>,
    disconnect_timeout: Mutex<Duration>,
    transport_connect_timeout: Mutex<Duration>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    headers: Mutex<Vec<(String, String)>>,
    events: EventRegistry,
    timers: TimerRegistry,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// A client connection to a persistent-connection endpoint.
///
/// Cheap to clone; clones share the same underlying connection.
#[derive(Clone)]
pub struct PersistentConnection {
    inner: Arc<Inner>,
}

impl PersistentConnection {
    /// Create a connection from configuration. The connection starts
    /// out `Disconnected`; call [`start`](Self::start) to bring it up.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        let headers = config.headers.clone();
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                identity: Mutex::new(ConnectionIdentity::default()),
                keep_alive: Mutex::new(None),
                disconnect_timeout: Mutex::new(Duration::from_secs(
                    DEFAULT_DISCONNECT_TIMEOUT_SECS,
                )),
                transport_connect_timeout: Mutex::new(Duration::from_secs(
                    DEFAULT_TRANSPORT_CONNECT_TIMEOUT_SECS,
                )),
                transport: Mutex::new(None),
                headers: Mutex::new(headers),
                events: EventRegistry::default(),
                timers: TimerRegistry::default(),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Convenience constructor with default configuration.
    #[must_use]
    pub fn with_url(url: Url) -> Self {
        Self::new(ConnectionConfig::new(url))
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    // ---- lifecycle ------------------------------------------------

    /// Start the connection over the given transport.
    ///
    /// A no-op unless the connection is currently `Disconnected`; only
    /// one start sequence can be outstanding. On success the
    /// connection is `Connected`, the heartbeat monitor is armed (when
    /// keep-alive applies), and `Started` has fired. A stop that lands
    /// while the start sequence is in flight wins quietly: `start`
    /// returns `Ok` and the connection stays down.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ProtocolMismatch`] when the server
    /// speaks a different protocol version (fatal, never retried),
    /// [`ConnectionError::Negotiation`] when the negotiate exchange
    /// fails, and [`ConnectionError::StartFailed`] when the transport
    /// cannot establish its data channel within the connect timeout.
    /// All of these tear the connection down locally.
    pub async fn start(&self, transport: Arc<dyn Transport>) -> Result<(), ConnectionError> {
        if !self.change_state(ConnectionState::Disconnected, ConnectionState::Connecting) {
            tracing::debug!(state = %self.state(), "start ignored: connection is not disconnected");
            return Ok(());
        }
        *self.inner.transport.lock_blocking() = Some(transport.clone());
        tracing::info!(url = %self.inner.config.url, transport = %transport.kind(), "starting connection");

        let negotiation = match transport.negotiate(self).await {
            Ok(negotiation) => negotiation,
            Err(err) => {
                // No session exists yet, so the server is not notified.
                let err = ConnectionError::Negotiation(err);
                self.emit(&ConnectionEvent::Error(err.clone()));
                self.teardown_local().await;
                return Err(err);
            }
        };

        // A concurrent stop may have torn the connection down while
        // the negotiate exchange was in flight; its teardown already
        // raised `Closed`, so the session parameters are discarded.
        if self.state() != ConnectionState::Connecting {
            return Ok(());
        }

        if negotiation.protocol_version != CLIENT_PROTOCOL_VERSION {
            let err = ConnectionError::ProtocolMismatch {
                client: CLIENT_PROTOCOL_VERSION.to_string(),
                server: negotiation.protocol_version.clone(),
            };
            tracing::error!(%err, "negotiation returned an incompatible protocol");
            self.emit(&ConnectionEvent::Error(err.clone()));
            self.teardown_local().await;
            return Err(err);
        }

        self.apply_negotiation(&negotiation);

        let connect_timeout = *self.inner.transport_connect_timeout.lock_blocking();
        let started = tokio::time::timeout(connect_timeout, transport.start(self)).await;
        match started {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let err = ConnectionError::StartFailed(err);
                self.emit(&ConnectionEvent::Error(err.clone()));
                self.teardown_local().await;
                return Err(err);
            }
            Err(_elapsed) => {
                let err = ConnectionError::StartFailed(TransportError::Timeout);
                self.emit(&ConnectionEvent::Error(err.clone()));
                self.teardown_local().await;
                return Err(err);
            }
        }

        if !self.change_state(ConnectionState::Connecting, ConnectionState::Connected) {
            // A concurrent stop won the race mid-start; `Closed` has
            // already fired. Identity stored during negotiation must
            // not outlive the teardown.
            self.inner.identity.lock_blocking().clear();
            self.inner.keep_alive.lock_blocking().take();
            return Ok(());
        }

        self.start_heartbeat();
        tracing::info!(connection_id = ?self.connection_id(), "connection started");
        self.emit(&ConnectionEvent::Started);
        Ok(())
    }

    /// Stop the connection, notifying the server within the default
    /// abort timeout. Idempotent.
    pub async fn stop(&self) {
        let timeout = self.inner.config.abort_timeout;
        self.stop_with(Some(timeout)).await;
    }

    /// Stop the connection. `None` skips the server notification and
    /// tears down locally. Idempotent.
    pub async fn stop_with(&self, timeout: Option<Duration>) {
        if self.state() == ConnectionState::Disconnected {
            tracing::debug!("stop ignored: already disconnected");
            return;
        }
        tracing::info!(notify_server = timeout.is_some(), "stopping connection");
        self.stop_heartbeat();
        if let Some(transport) = self.active_transport() {
            transport.abort(self, timeout).await;
        }
        self.disconnect();
    }

    /// The single terminal path: every teardown route funnels through
    /// here. Sets `Disconnected`, stops the monitor, cancels timers,
    /// wipes identity and keep-alive data, and raises `Closed`.
    /// Idempotent.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock_blocking();
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        tracing::info!("connection disconnected");
        self.emit(&ConnectionEvent::StateChanged(ConnectionState::Disconnected));

        self.stop_heartbeat();
        self.inner.timers.cancel_all();
        self.inner.keep_alive.lock_blocking().take();
        self.inner.identity.lock_blocking().clear();
        self.inner.transport.lock_blocking().take();

        self.emit(&ConnectionEvent::Closed);
    }

    /// Guarded compare-and-set state transition.
    ///
    /// Returns whether the transition was applied. Applied transitions
    /// invoke the state-changed notification and the delegate hook, in
    /// that order, on the calling turn; a failed compare leaves the
    /// state untouched and fires nothing.
    pub fn change_state(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        {
            let mut state = self.inner.state.lock_blocking();
            if *state != expected {
                return false;
            }
            *state = next;
        }
        tracing::debug!(from = %expected, to = %next, "state changed");
        self.emit(&ConnectionEvent::StateChanged(next));
        true
    }

    // ---- reconnection --------------------------------------------

    /// Report an unexpected connectivity loss.
    ///
    /// Attempts `Connected → Reconnecting` and, if applied, arms the
    /// disconnect-timeout watchdog and raises `Reconnecting`. Repeated
    /// calls while already reconnecting are no-ops. Returns whether the
    /// connection is now in `Reconnecting`.
    pub fn ensure_reconnecting(&self) -> bool {
        if self.change_state(ConnectionState::Connected, ConnectionState::Reconnecting) {
            self.will_reconnect();
        }
        self.state() == ConnectionState::Reconnecting
    }

    fn will_reconnect(&self) {
        let timeout = *self.inner.disconnect_timeout.lock_blocking();
        tracing::info!(?timeout, "connection lost, reconnect window open");

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .timers
            .schedule(TimerPurpose::DisconnectTimeout, timeout, async move {
                if let Some(inner) = weak.upgrade() {
                    let conn = PersistentConnection::from_inner(inner);
                    tracing::warn!("reconnect window expired, stopping connection");
                    conn.stop_with(None).await;
                }
            });

        self.emit(&ConnectionEvent::Reconnecting);
    }

    /// Record a successful reconnect: cancels the disconnect-timeout
    /// watchdog, raises `Reconnected`, and refreshes keep-alive.
    pub fn did_reconnect(&self) {
        tracing::info!("connection reconnected");
        self.inner.timers.cancel(TimerPurpose::DisconnectTimeout);
        self.emit(&ConnectionEvent::Reconnected);
        self.touch_keep_alive();
    }

    // ---- data path ------------------------------------------------

    /// Send one application payload over the active transport.
    ///
    /// Never blocks waiting for a response; delivery acknowledgment,
    /// if any, arrives through [`process_response`](Self::process_response).
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotStarted`] when disconnected and
    /// [`ConnectionError::NotEstablished`] while connecting — both
    /// reported through the error event as well, without touching the
    /// transport. Transport failures are forwarded as
    /// [`ConnectionError::Transport`].
    pub async fn send(&self, data: impl Into<String>) -> Result<(), ConnectionError> {
        let data = data.into();
        match self.state() {
            ConnectionState::Disconnected => {
                let err = ConnectionError::NotStarted;
                self.emit(&ConnectionEvent::Error(err.clone()));
                Err(err)
            }
            ConnectionState::Connecting => {
                let err = ConnectionError::NotEstablished;
                self.emit(&ConnectionEvent::Error(err.clone()));
                Err(err)
            }
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                let Some(transport) = self.active_transport() else {
                    let err = ConnectionError::Transport(TransportError::NotConnected);
                    self.emit(&ConnectionEvent::Error(err.clone()));
                    return Err(err);
                };
                transport.send(self, data).await.map_err(|err| {
                    let err = ConnectionError::Transport(err);
                    self.emit(&ConnectionEvent::Error(err.clone()));
                    err
                })
            }
        }
    }

    /// The single ingestion point for all inbound data; every
    /// transport calls this after decoding a frame.
    ///
    /// Refreshes the keep-alive timestamp first (liveness survives
    /// logically-empty frames), dispatches a full-envelope received
    /// event when a result is present, applies last-write-wins updates
    /// to the groups token and message id, and then either
    /// short-circuits on a server disconnect or raises one received
    /// event per message in server-sent order.
    pub fn process_response(&self, envelope: &ReceivedEnvelope) -> ProcessOutcome {
        self.touch_keep_alive();

        let mut outcome = ProcessOutcome::default();
        if envelope.should_reconnect() {
            outcome.should_reconnect = true;
        }

        if envelope.result.is_some() {
            if let Ok(raw) = serde_json::to_value(envelope) {
                self.emit(&ConnectionEvent::Received(raw));
            }
        }

        {
            let mut identity = self.inner.identity.lock_blocking();
            if let Some(groups) = &envelope.groups_token {
                identity.groups_token = Some(groups.clone());
            }
            if let Some(id) = &envelope.message_id {
                identity.message_id = Some(id.clone());
            }
        }

        if envelope.disconnected() {
            tracing::info!("server requested disconnect");
            outcome.disconnected = true;
            return outcome;
        }

        for message in &envelope.messages {
            self.emit(&ConnectionEvent::Received(message.clone()));
        }

        outcome
    }

    /// Record inbound activity for the heartbeat monitor.
    pub fn touch_keep_alive(&self) {
        if let Some(keep_alive) = self.inner.keep_alive.lock_blocking().as_mut() {
            keep_alive.touch();
        }
    }

    /// Time since inbound activity, when keep-alive applies.
    #[must_use]
    pub fn time_since_keep_alive(&self) -> Option<Duration> {
        self.inner
            .keep_alive
            .lock_blocking()
            .as_ref()
            .map(KeepAliveData::elapsed)
    }

    /// Forward a transport failure to the error event without touching
    /// connection state.
    pub fn report_transport_error(&self, err: TransportError) {
        self.emit(&ConnectionEvent::Error(ConnectionError::Transport(err)));
    }

    // ---- heartbeat ------------------------------------------------

    fn start_heartbeat(&self) {
        let Some(keep_alive) = *self.inner.keep_alive.lock_blocking() else {
            tracing::debug!("no keep-alive data, heartbeat monitor not armed");
            return;
        };
        let supported = self
            .active_transport()
            .is_some_and(|t| t.supports_keep_alive());
        if !supported {
            tracing::debug!("transport handles its own liveness, heartbeat monitor not armed");
            return;
        }

        let handle = heartbeat::spawn(Arc::downgrade(&self.inner), keep_alive.timeout);
        if let Some(old) = self.inner.monitor.lock_blocking().replace(handle) {
            old.abort();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.inner.monitor.lock_blocking().take() {
            handle.abort();
        }
    }

    // ---- accessors ------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock_blocking()
    }

    /// Base endpoint URL (trailing slash ensured).
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.config.url
    }

    /// Extra query-string pairs for every request.
    #[must_use]
    pub fn query_string(&self) -> &[(String, String)] {
        &self.inner.config.query_string
    }

    /// Connection-data descriptor, when configured.
    #[must_use]
    pub fn connection_data(&self) -> Option<&str> {
        self.inner.config.connection_data.as_deref()
    }

    /// Snapshot of the request headers.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.inner.headers.lock_blocking().clone()
    }

    /// Set (or replace) a request header.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut headers = self.inner.headers.lock_blocking();
        headers.retain(|(existing, _)| *existing != name);
        headers.push((name, value.into()));
    }

    /// Snapshot of the server-assigned identity.
    #[must_use]
    pub fn identity(&self) -> ConnectionIdentity {
        self.inner.identity.lock_blocking().clone()
    }

    /// Server-assigned connection id, once negotiated.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner.identity.lock_blocking().connection_id.clone()
    }

    /// Connection token carried on every request, once negotiated.
    #[must_use]
    pub fn connection_token(&self) -> Option<String> {
        self.inner.identity.lock_blocking().connection_token.clone()
    }

    /// Current groups token.
    #[must_use]
    pub fn groups_token(&self) -> Option<String> {
        self.inner.identity.lock_blocking().groups_token.clone()
    }

    /// Current message id cursor.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.inner.identity.lock_blocking().message_id.clone()
    }

    /// Purpose-keyed timer table for this connection.
    #[must_use]
    pub fn timers(&self) -> &TimerRegistry {
        &self.inner.timers
    }

    /// The transport currently bound to this connection.
    #[must_use]
    pub fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.lock_blocking().clone()
    }

    // ---- events ---------------------------------------------------

    /// Subscribe to every event.
    pub fn on_event(&self, handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe(Box::new(handler));
    }

    /// Subscribe to received payloads.
    pub fn on_received(&self, handler: impl Fn(&serde_json::Value) + Send + Sync + 'static) {
        self.on_event(move |event| {
            if let ConnectionEvent::Received(data) = event {
                handler(data);
            }
        });
    }

    /// Subscribe to surfaced errors.
    pub fn on_error(&self, handler: impl Fn(&ConnectionError) + Send + Sync + 'static) {
        self.on_event(move |event| {
            if let ConnectionEvent::Error(err) = event {
                handler(err);
            }
        });
    }

    /// Subscribe to state transitions.
    pub fn on_state_changed(&self, handler: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.on_event(move |event| {
            if let ConnectionEvent::StateChanged(state) = event {
                handler(*state);
            }
        });
    }

    /// Subscribe to connection closure.
    pub fn on_closed(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.on_event(move |event| {
            if matches!(event, ConnectionEvent::Closed) {
                handler();
            }
        });
    }

    /// Install the structured delegate. Replaces any previous one.
    pub fn set_delegate(&self, delegate: Arc<dyn ConnectionDelegate>) {
        self.inner.events.set_delegate(delegate);
    }

    pub(crate) fn emit(&self, event: &ConnectionEvent) {
        self.inner.events.emit(event);
    }

    fn apply_negotiation(&self, negotiation: &NegotiationResponse) {
        {
            let mut identity = self.inner.identity.lock_blocking();
            identity.connection_id = Some(negotiation.connection_id.clone());
            identity.connection_token = Some(negotiation.connection_token.clone());
        }
        *self.inner.disconnect_timeout.lock_blocking() = negotiation.disconnect_timeout();
        if let Some(connect_timeout) = negotiation.transport_connect_timeout() {
            *self.inner.transport_connect_timeout.lock_blocking() = connect_timeout;
        }
        *self.inner.keep_alive.lock_blocking() = negotiation
            .keep_alive_timeout()
            .map(KeepAliveData::new);
    }

    /// Local teardown for failures before a session exists: tear down
    /// the transport without notifying the server, then disconnect.
    async fn teardown_local(&self) {
        self.stop_heartbeat();
        if let Some(transport) = self.active_transport() {
            transport.abort(self, None).await;
        }
        self.disconnect();
    }
}

impl fmt::Debug for PersistentConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentConnection")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .finish_non_exhaustive()
    }
}
