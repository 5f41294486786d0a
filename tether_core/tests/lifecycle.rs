//! End-to-end lifecycle behavior against a scripted transport.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use url::Url;

use tether_core::{
    connection::{ConnectionEvent, ConnectionState, PersistentConnection},
    error::{ConnectionError, TransportError},
    protocol::{NegotiationResponse, ReceivedEnvelope},
    transport::{Transport, TransportKind},
};

/// A transport whose negotiate/start outcomes are scripted up front
/// and whose side effects are recorded.
struct MockTransport {
    protocol_version: String,
    disconnect_timeout: f64,
    keep_alive_timeout: Option<f64>,
    negotiate_fails: bool,
    start_fails: bool,
    negotiate_delay: Option<Duration>,
    start_delay: Option<Duration>,
    negotiates: AtomicUsize,
    sent: Mutex<Vec<String>>,
    aborts: Mutex<Vec<Option<Duration>>>,
}

impl MockTransport {
    fn healthy() -> Arc<Self> {
        Arc::new(Self::unwrapped_healthy())
    }

    fn with_protocol(version: &str) -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.protocol_version = version.into();
        Arc::new(this)
    }

    fn with_disconnect_timeout(secs: f64) -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.disconnect_timeout = secs;
        Arc::new(this)
    }

    fn with_keep_alive(secs: f64) -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.keep_alive_timeout = Some(secs);
        Arc::new(this)
    }

    fn failing_negotiate() -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.negotiate_fails = true;
        Arc::new(this)
    }

    fn failing_start() -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.start_fails = true;
        Arc::new(this)
    }

    fn slow_negotiate() -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.negotiate_delay = Some(Duration::from_millis(80));
        Arc::new(this)
    }

    fn slow_start() -> Arc<Self> {
        let mut this = Self::unwrapped_healthy();
        this.start_delay = Some(Duration::from_millis(80));
        Arc::new(this)
    }

    fn unwrapped_healthy() -> Self {
        Self {
            protocol_version: "1.4".into(),
            disconnect_timeout: 30.0,
            keep_alive_timeout: Some(20.0),
            negotiate_fails: false,
            start_fails: false,
            negotiate_delay: None,
            start_delay: None,
            negotiates: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn supports_keep_alive(&self) -> bool {
        true
    }

    fn negotiate<'a>(
        &'a self,
        _connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<NegotiationResponse, TransportError>> {
        self.negotiates.fetch_add(1, Ordering::SeqCst);
        async move {
            if let Some(delay) = self.negotiate_delay {
                tokio::time::sleep(delay).await;
            }
            if self.negotiate_fails {
                return Err(TransportError::Status(503));
            }
            Ok(NegotiationResponse {
                protocol_version: self.protocol_version.clone(),
                connection_id: "conn-1".into(),
                connection_token: "token-1".into(),
                url: None,
                disconnect_timeout: self.disconnect_timeout,
                transport_connect_timeout: Some(5.0),
                keep_alive_timeout: self.keep_alive_timeout,
                try_web_sockets: false,
            })
        }
        .boxed()
    }

    fn start<'a>(
        &'a self,
        _connection: &'a PersistentConnection,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            if let Some(delay) = self.start_delay {
                tokio::time::sleep(delay).await;
            }
            if self.start_fails {
                Err(TransportError::Socket("connect refused".into()))
            } else {
                Ok(())
            }
        }
        .boxed()
    }

    fn send<'a>(
        &'a self,
        _connection: &'a PersistentConnection,
        data: String,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        self.sent.lock().unwrap().push(data);
        async { Ok(()) }.boxed()
    }

    fn abort<'a>(
        &'a self,
        _connection: &'a PersistentConnection,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, ()> {
        self.aborts.lock().unwrap().push(timeout);
        async {}.boxed()
    }

    fn lost_connection(&self, connection: &PersistentConnection) {
        connection.ensure_reconnecting();
    }
}

fn connection() -> PersistentConnection {
    PersistentConnection::with_url(Url::parse("http://example.com/signalr").unwrap())
}

/// Record every event as a short label.
fn record_events(conn: &PersistentConnection) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    conn.on_event(move |event| {
        let label = match event {
            ConnectionEvent::Started => "started".to_string(),
            ConnectionEvent::Received(data) => format!("received:{data}"),
            ConnectionEvent::Error(err) => format!("error:{err}"),
            ConnectionEvent::Closed => "closed".to_string(),
            ConnectionEvent::Reconnecting => "reconnecting".to_string(),
            ConnectionEvent::Reconnected => "reconnected".to_string(),
            ConnectionEvent::StateChanged(state) => format!("state:{state}"),
            ConnectionEvent::Slow => "slow".to_string(),
        };
        sink.lock().unwrap().push(label);
    });
    log
}

fn count(log: &Mutex<Vec<String>>, label: &str) -> usize {
    log.lock().unwrap().iter().filter(|l| *l == label).count()
}

#[tokio::test]
async fn happy_start_reaches_connected_and_fires_started() {
    let conn = connection();
    let log = record_events(&conn);
    let transport = MockTransport::healthy();

    conn.start(transport).await.expect("start");

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.connection_id().as_deref(), Some("conn-1"));
    assert_eq!(conn.connection_token().as_deref(), Some("token-1"));

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["state:connecting", "state:connected", "started"]
    );
}

#[tokio::test]
async fn start_is_a_no_op_unless_disconnected() {
    let conn = connection();
    let transport = MockTransport::healthy();

    conn.start(transport.clone()).await.expect("first start");
    conn.start(transport.clone()).await.expect("second start is silent");

    assert_eq!(transport.negotiates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn protocol_mismatch_is_fatal_and_tears_down_locally() {
    let conn = connection();
    let log = record_events(&conn);
    let transport = MockTransport::with_protocol("1.3");

    let err = conn.start(transport.clone()).await.expect_err("mismatch");
    assert!(matches!(err, ConnectionError::ProtocolMismatch { .. }));

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.connection_token(), None);
    assert_eq!(count(&log, "closed"), 1);
    // Torn down without notifying the server.
    assert_eq!(*transport.aborts.lock().unwrap(), vec![None]);
    // Never retried.
    assert_eq!(transport.negotiates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn negotiate_failure_surfaces_error_and_closes() {
    let conn = connection();
    let log = record_events(&conn);

    let err = conn
        .start(MockTransport::failing_negotiate())
        .await
        .expect_err("negotiate fails");
    assert!(matches!(err, ConnectionError::Negotiation(_)));

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    let events = log.lock().unwrap().clone();
    assert!(events.iter().any(|l| l.starts_with("error:")));
    assert_eq!(count(&log, "closed"), 1);
}

#[tokio::test]
async fn start_failure_surfaces_error_and_closes() {
    let conn = connection();

    let err = conn
        .start(MockTransport::failing_start())
        .await
        .expect_err("transport start fails");
    assert!(matches!(err, ConnectionError::StartFailed(_)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn send_while_disconnected_is_not_started() {
    let conn = connection();
    let log = record_events(&conn);

    let err = conn.send("hello").await.expect_err("not started");
    assert!(matches!(err, ConnectionError::NotStarted));
    assert!(log.lock().unwrap()[0].starts_with("error:"));
}

#[tokio::test]
async fn send_while_connecting_is_not_established() {
    let conn = connection();
    assert!(conn.change_state(ConnectionState::Disconnected, ConnectionState::Connecting));

    let err = conn.send("hello").await.expect_err("not established");
    assert!(matches!(err, ConnectionError::NotEstablished));
}

#[tokio::test]
async fn send_goes_through_the_active_transport() {
    let conn = connection();
    let transport = MockTransport::healthy();
    conn.start(transport.clone()).await.expect("start");

    conn.send("payload").await.expect("send");

    assert_eq!(*transport.sent.lock().unwrap(), vec!["payload".to_string()]);
}

#[tokio::test]
async fn messages_are_delivered_in_order_and_refresh_keep_alive() {
    let conn = connection();
    conn.start(MockTransport::healthy()).await.expect("start");
    let log = record_events(&conn);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(conn.time_since_keep_alive().expect("armed") >= Duration::from_millis(30));

    let envelope = ReceivedEnvelope::decode(r#"{"C":"d-3","M":["a","b","c"],"G":"grp"}"#)
        .expect("decode")
        .expect("envelope");
    let outcome = conn.process_response(&envelope);

    assert!(!outcome.disconnected);
    assert!(!outcome.should_reconnect);
    assert_eq!(conn.message_id().as_deref(), Some("d-3"));
    assert_eq!(conn.groups_token().as_deref(), Some("grp"));
    assert!(conn.time_since_keep_alive().expect("armed") < Duration::from_millis(30));

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "received:\"a\"".to_string(),
            "received:\"b\"".to_string(),
            "received:\"c\"".to_string(),
        ]
    );
}

#[tokio::test]
async fn server_disconnect_short_circuits_pending_messages() {
    let conn = connection();
    conn.start(MockTransport::healthy()).await.expect("start");
    let log = record_events(&conn);

    let envelope = ReceivedEnvelope::decode(r#"{"D":1,"M":["late"]}"#)
        .expect("decode")
        .expect("envelope");
    let outcome = conn.process_response(&envelope);

    assert!(outcome.disconnected);
    assert_eq!(count(&log, "received:\"late\""), 0);

    // The transport reacts by tearing down without server notification.
    conn.disconnect();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(count(&log, "closed"), 1);
}

#[tokio::test]
async fn loss_reconnecting_reconnected_round_trip() {
    let conn = connection();
    conn.start(MockTransport::healthy()).await.expect("start");
    let log = record_events(&conn);

    assert!(conn.ensure_reconnecting());
    assert_eq!(conn.state(), ConnectionState::Reconnecting);

    // Idempotent while already reconnecting.
    assert!(conn.ensure_reconnecting());
    assert_eq!(count(&log, "reconnecting"), 1);

    assert!(conn.change_state(ConnectionState::Reconnecting, ConnectionState::Connected));
    conn.did_reconnect();

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(count(&log, "reconnected"), 1);
    assert_eq!(count(&log, "closed"), 0);
}

#[tokio::test]
async fn watchdog_expiry_force_stops_a_stuck_reconnect() {
    let conn = connection();
    let transport = MockTransport::with_disconnect_timeout(0.05);
    conn.start(transport.clone()).await.expect("start");
    let log = record_events(&conn);

    assert!(conn.ensure_reconnecting());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(count(&log, "closed"), 1);
    // Watchdog teardown skips the server notification.
    assert_eq!(*transport.aborts.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn stop_is_idempotent_and_notifies_the_server_once() {
    let conn = connection();
    let transport = MockTransport::healthy();
    conn.start(transport.clone()).await.expect("start");
    let log = record_events(&conn);

    conn.stop().await;
    conn.stop().await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(count(&log, "closed"), 1);

    let aborts = transport.aborts.lock().unwrap().clone();
    assert_eq!(aborts.len(), 1);
    assert!(aborts[0].is_some());
}

#[tokio::test]
async fn change_state_matrix() {
    let conn = connection();
    let log = record_events(&conn);

    // Refused transitions leave state and events untouched.
    assert!(!conn.change_state(ConnectionState::Connected, ConnectionState::Reconnecting));
    assert!(!conn.change_state(ConnectionState::Connecting, ConnectionState::Connected));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(log.lock().unwrap().is_empty());

    // Applied transitions fire exactly one state-changed each.
    assert!(conn.change_state(ConnectionState::Disconnected, ConnectionState::Connecting));
    assert!(conn.change_state(ConnectionState::Connecting, ConnectionState::Connected));
    assert!(conn.change_state(ConnectionState::Connected, ConnectionState::Reconnecting));
    assert!(conn.change_state(ConnectionState::Reconnecting, ConnectionState::Connected));

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "state:connecting",
            "state:connected",
            "state:reconnecting",
            "state:connected",
        ]
    );
}

#[tokio::test]
async fn stop_during_negotiate_wins_quietly() {
    let conn = connection();
    let log = record_events(&conn);
    let transport = MockTransport::slow_negotiate();

    let task = tokio::spawn({
        let conn = conn.clone();
        let transport = transport.clone();
        async move { conn.start(transport).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    conn.stop().await;

    task.await.expect("join").expect("stop race is swallowed");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.connection_token(), None);
    assert_eq!(conn.connection_id(), None);
    assert_eq!(count(&log, "started"), 0);
    assert_eq!(count(&log, "closed"), 1);
}

#[tokio::test]
async fn stop_during_transport_start_wins_quietly() {
    let conn = connection();
    let log = record_events(&conn);
    let transport = MockTransport::slow_start();

    let task = tokio::spawn({
        let conn = conn.clone();
        let transport = transport.clone();
        async move { conn.start(transport).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    conn.stop().await;

    task.await.expect("join").expect("stop race is swallowed");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.connection_token(), None);
    assert_eq!(count(&log, "started"), 0);
    assert_eq!(count(&log, "closed"), 1);
}

#[tokio::test]
async fn quiet_connection_goes_slow_then_lost() {
    let conn = connection();
    let transport = MockTransport::with_keep_alive(0.2);
    conn.start(transport).await.expect("start");
    let log = record_events(&conn);

    // Past two thirds of the window: slow, exactly once.
    tokio::time::sleep(Duration::from_millis(180)).await;
    assert_eq!(count(&log, "slow"), 1);

    // Past the full window: treated as lost, which routes into the
    // reconnect grace period.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(conn.state(), ConnectionState::Reconnecting);
    assert_eq!(count(&log, "reconnecting"), 1);
}

#[tokio::test]
async fn result_envelope_is_surfaced_whole() {
    let conn = connection();
    conn.start(MockTransport::healthy()).await.expect("start");
    let log = record_events(&conn);

    let envelope = ReceivedEnvelope::decode(r#"{"R":{"ok":true}}"#)
        .expect("decode")
        .expect("envelope");
    conn.process_response(&envelope);

    let events = log.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("received:"));
    assert!(events[0].contains("\"R\""));
}
