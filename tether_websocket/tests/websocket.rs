//! Socket session behavior against a scripted connector.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{channel::mpsc, future::BoxFuture, FutureExt, StreamExt};
use url::Url;

use tether_core::{
    connection::{ConnectionEvent, ConnectionState, PersistentConnection},
    error::ConnectionError,
    http::{HttpClient, HttpError, HttpRequest, HttpResponse},
    transport::Transport,
};
use tether_websocket::{Frames, Socket, SocketConnector, SocketError, WebSocketTransport};

const NEGOTIATION: &str = r#"{
    "ConnectionToken": "token-1",
    "ConnectionId": "conn-1",
    "DisconnectTimeout": 30.0,
    "TransportConnectTimeout": 5.0,
    "KeepAliveTimeout": 20.0,
    "ProtocolVersion": "1.4"
}"#;

/// Serves negotiation and records every request path.
#[derive(Clone)]
struct MiniHttp {
    requests: Arc<Mutex<Vec<String>>>,
}

impl MiniHttp {
    fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn requests_to(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.contains(endpoint))
            .count()
    }
}

impl HttpClient for MiniHttp {
    fn issue(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
        let path = request.url.path().to_owned();
        async move {
            self.requests.lock().unwrap().push(path.clone());
            let body = if path.ends_with("/negotiate") {
                NEGOTIATION.to_owned()
            } else {
                String::new()
            };
            Ok(HttpResponse { status: 200, body })
        }
        .boxed()
    }
}

struct MockSocket {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    frame_tx: mpsc::UnboundedSender<Result<String, SocketError>>,
}

impl Socket for MockSocket {
    fn send_text(&self, text: String) -> BoxFuture<'_, Result<(), SocketError>> {
        self.sent.lock().unwrap().push(text);
        async { Ok(()) }.boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.closed.store(true, Ordering::SeqCst);
        self.frame_tx.close_channel();
        async {}.boxed()
    }
}

/// Opens scripted sockets; each one is driven from the test through
/// its frame channel.
#[derive(Clone)]
struct MockConnector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    // `false` entries refuse the connect; exhausted script means open.
    refusals: Mutex<VecDeque<bool>>,
    sockets: Mutex<Vec<Arc<MockSocket>>>,
    urls: Mutex<Vec<String>>,
}

impl MockConnector {
    fn new() -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                refusals: Mutex::new(VecDeque::new()),
                sockets: Mutex::new(Vec::new()),
                urls: Mutex::new(Vec::new()),
            }),
        }
    }

    fn refuse_next(&self) {
        self.inner.refusals.lock().unwrap().push_back(false);
    }

    fn opened(&self) -> usize {
        self.inner.sockets.lock().unwrap().len()
    }

    fn socket(&self, index: usize) -> Arc<MockSocket> {
        self.inner.sockets.lock().unwrap()[index].clone()
    }

    fn push_frame(&self, index: usize, body: &str) {
        let socket = self.socket(index);
        socket
            .frame_tx
            .unbounded_send(Ok(body.to_owned()))
            .expect("frame channel open");
    }

    fn drop_socket(&self, index: usize) {
        self.socket(index).frame_tx.close_channel();
    }

    fn url(&self, index: usize) -> String {
        self.inner.urls.lock().unwrap()[index].clone()
    }
}

impl SocketConnector for MockConnector {
    fn connect(
        &self,
        url: Url,
    ) -> BoxFuture<'_, Result<(Arc<dyn Socket>, Frames), SocketError>> {
        async move {
            self.inner.urls.lock().unwrap().push(url.to_string());

            if self.inner.refusals.lock().unwrap().pop_front() == Some(false) {
                return Err(SocketError::Io("connect refused".into()));
            }

            let (tx, rx) = mpsc::unbounded();
            let socket = Arc::new(MockSocket {
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                frame_tx: tx,
            });
            self.inner.sockets.lock().unwrap().push(socket.clone());
            Ok((socket as Arc<dyn Socket>, rx.boxed()))
        }
        .boxed()
    }
}

fn connection() -> PersistentConnection {
    PersistentConnection::with_url(Url::parse("http://example.com/signalr").unwrap())
}

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

/// Drive a full start: spawn it, feed the init frame once the socket
/// is open, and wait for it to resolve.
async fn start(
    conn: &PersistentConnection,
    transport: Arc<WebSocketTransport<MiniHttp>>,
    connector: &MockConnector,
) {
    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.start(transport).await }
    });

    for _ in 0..50 {
        if connector.opened() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    connector.push_frame(0, r#"{"S":1}"#);

    task.await.expect("join").expect("start");
}

fn transport(http: &MiniHttp, connector: &MockConnector) -> Arc<WebSocketTransport<MiniHttp>> {
    Arc::new(
        WebSocketTransport::with_connector(http.clone(), connector.clone())
            .reconnect_pause(Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn start_resolves_on_the_init_frame() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();

    start(&conn, transport(&http, &connector), &connector).await;

    assert_eq!(conn.state(), ConnectionState::Connected);
    let opened = connector.url(0);
    assert!(opened.starts_with("ws://"));
    assert!(opened.contains("/connect"));
    assert!(opened.contains("transport=webSockets"));
}

#[tokio::test]
async fn frames_deliver_messages_in_order() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();
    start(&conn, transport(&http, &connector), &connector).await;
    let log = record_events(&conn);

    connector.push_frame(0, r#"{"C":"d-1","M":["a","b"]}"#);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["received:\"a\"", "received:\"b\""]);
    assert_eq!(conn.message_id().as_deref(), Some("d-1"));
}

#[tokio::test]
async fn send_writes_a_text_frame() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();
    start(&conn, transport(&http, &connector), &connector).await;

    conn.send("hello").await.expect("send");

    assert_eq!(
        *connector.socket(0).sent.lock().unwrap(),
        vec!["hello".to_string()]
    );
}

#[tokio::test]
async fn dropped_socket_reconnects_through_the_reconnect_endpoint() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();
    start(&conn, transport(&http, &connector), &connector).await;
    let log = record_events(&conn);

    connector.drop_socket(0);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(count(&log, "reconnecting"), 1);
    assert_eq!(count(&log, "reconnected"), 1);
    assert_eq!(connector.opened(), 2);
    assert!(connector.url(1).contains("/reconnect"));
}

#[tokio::test]
async fn refused_connect_fails_the_start() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();
    connector.refuse_next();

    let err = conn
        .start(transport(&http, &connector))
        .await
        .expect_err("refused");
    assert!(matches!(err, ConnectionError::StartFailed(_)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stop_closes_the_socket_and_notifies_the_server() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();
    start(&conn, transport(&http, &connector), &connector).await;

    conn.stop().await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(connector.socket(0).closed.load(Ordering::SeqCst));
    assert_eq!(http.requests_to("/abort"), 1);
}

#[tokio::test]
async fn server_disconnect_is_terminal() {
    let conn = connection();
    let http = MiniHttp::new();
    let connector = MockConnector::new();
    start(&conn, transport(&http, &connector), &connector).await;
    let log = record_events(&conn);

    connector.push_frame(0, r#"{"D":1}"#);
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(count(&log, "closed"), 1);
    // No reconnect attempt follows a server-requested disconnect.
    assert_eq!(connector.opened(), 1);
}
