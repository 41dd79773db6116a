use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bizdesk_realtime::{
    ConnectionState, Event, PollMode, PublishError, RealtimeConfig, RealtimeHub, ReconnectPolicy,
    Subscription,
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

const TOKEN: &str = "test-token";

/// What the mock stream endpoint does when a client opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    /// Relay everything sent through `MockBackend::emit` until the client leaves.
    Live,
    /// Answer 503.
    Reject,
    /// Send the queued `finite` frames, then end the body.
    Finite,
}

#[derive(Debug, Clone)]
enum Frame {
    Event(JsonValue),
    Raw(String),
    Heartbeat,
}

impl Frame {
    fn into_sse(self) -> SseEvent {
        match self {
            Frame::Event(value) => SseEvent::default().data(value.to_string()),
            Frame::Raw(raw) => SseEvent::default().data(raw),
            Frame::Heartbeat => SseEvent::default().event("heartbeat").data("{}"),
        }
    }
}

struct BackendState {
    live: broadcast::Sender<Frame>,
    mode: Mutex<StreamMode>,
    finite: Mutex<Vec<Frame>>,
    recent: Mutex<(StatusCode, JsonValue)>,
    publish_status: Mutex<StatusCode>,
    published: Mutex<Vec<JsonValue>>,
    auth: Mutex<Vec<Option<String>>>,
    stream_hits: AtomicUsize,
    recent_hits: AtomicUsize,
}

#[derive(Clone)]
struct MockBackend(Arc<BackendState>);

impl MockBackend {
    fn new() -> Self {
        let (live, _) = broadcast::channel(64);
        Self(Arc::new(BackendState {
            live,
            mode: Mutex::new(StreamMode::Live),
            finite: Mutex::new(Vec::new()),
            recent: Mutex::new((StatusCode::OK, json!([]))),
            publish_status: Mutex::new(StatusCode::CREATED),
            published: Mutex::new(Vec::new()),
            auth: Mutex::new(Vec::new()),
            stream_hits: AtomicUsize::new(0),
            recent_hits: AtomicUsize::new(0),
        }))
    }

    fn emit(&self, frame: Frame) {
        // No receivers is fine: the client may be disconnected on purpose.
        let _ = self.0.live.send(frame);
    }

    fn set_mode(&self, mode: StreamMode) {
        *self.0.mode.lock().unwrap() = mode;
    }

    fn set_finite(&self, frames: Vec<Frame>) {
        *self.0.finite.lock().unwrap() = frames;
    }

    fn set_recent(&self, status: StatusCode, body: JsonValue) {
        *self.0.recent.lock().unwrap() = (status, body);
    }

    fn set_publish_status(&self, status: StatusCode) {
        *self.0.publish_status.lock().unwrap() = status;
    }

    fn published(&self) -> Vec<JsonValue> {
        self.0.published.lock().unwrap().clone()
    }

    fn auth_headers(&self) -> Vec<Option<String>> {
        self.0.auth.lock().unwrap().clone()
    }

    fn stream_hits(&self) -> usize {
        self.0.stream_hits.load(Ordering::SeqCst)
    }

    fn recent_hits(&self) -> usize {
        self.0.recent_hits.load(Ordering::SeqCst)
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.0.auth.lock().unwrap().push(value);
    }
}

async fn stream_handler(State(backend): State<MockBackend>, headers: HeaderMap) -> Response {
    backend.record_auth(&headers);
    backend.0.stream_hits.fetch_add(1, Ordering::SeqCst);

    let mode = *backend.0.mode.lock().unwrap();
    match mode {
        StreamMode::Reject => (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response(),
        StreamMode::Finite => {
            let frames = backend.0.finite.lock().unwrap().clone();
            let stream = tokio_stream::iter(
                frames
                    .into_iter()
                    .map(|frame| Ok::<_, Infallible>(frame.into_sse())),
            );
            Sse::new(stream).into_response()
        }
        StreamMode::Live => {
            let stream = BroadcastStream::new(backend.0.live.subscribe())
                .filter_map(|frame| frame.ok().map(|f| Ok::<_, Infallible>(f.into_sse())));
            Sse::new(stream)
                .keep_alive(KeepAlive::new().interval(Duration::from_millis(50)))
                .into_response()
        }
    }
}

async fn recent_handler(State(backend): State<MockBackend>, headers: HeaderMap) -> Response {
    backend.record_auth(&headers);
    backend.0.recent_hits.fetch_add(1, Ordering::SeqCst);

    let (status, body) = backend.0.recent.lock().unwrap().clone();
    (status, Json(body)).into_response()
}

async fn publish_handler(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    backend.record_auth(&headers);
    backend.0.published.lock().unwrap().push(body);

    let status = *backend.0.publish_status.lock().unwrap();
    if status.is_success() {
        (status, Json(json!({"status": "published"}))).into_response()
    } else {
        (status, "event type not allowed").into_response()
    }
}

async fn stats_handler() -> Json<JsonValue> {
    Json(json!({
        "total_events": 42,
        "by_type": {"order.created": 30, "invoice.paid": 12}
    }))
}

struct TestServer {
    base_url: String,
    backend: MockBackend,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let backend = MockBackend::new();
        let app = Router::new()
            .route("/api/events/stream/", get(stream_handler))
            .route("/api/events/recent/", get(recent_handler))
            .route("/api/events/publish/", post(publish_handler))
            .route("/api/events/stats/", get(stats_handler))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            backend,
            handle,
        }
    }

    fn config(&self) -> RealtimeConfig {
        RealtimeConfig::new(&self.base_url)
            .with_token(TOKEN)
            .with_request_timeout(Duration::from_secs(2))
    }

    fn hub(&self) -> RealtimeHub {
        RealtimeHub::new(self.config()).expect("failed to build hub")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn wire_event(id: &str, event_type: &str) -> JsonValue {
    json!({
        "event_id": id,
        "event_type": event_type,
        "source_service": "orders",
        "timestamp": Utc::now().to_rfc3339(),
        "data": {"ref": id},
    })
}

async fn wait_for_state(hub: &RealtimeHub, state: ConnectionState) {
    let mut rx = hub.watch_state();
    let reached = matches!(
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state)).await,
        Ok(Ok(_))
    );
    assert!(
        reached,
        "connection never reached {state:?}; now {:?}",
        hub.status()
    );
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{what} did not happen within timeout");
}

async fn next_id(sub: &mut Subscription) -> String {
    let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription closed");
    event.id().to_string()
}

async fn assert_quiet(sub: &mut Subscription) {
    tokio::time::sleep(Duration::from_millis(150)).await;
    if let Ok(event) = sub.try_recv() {
        panic!("unexpected event {} ({})", event.id(), event.event_type());
    }
}

fn ids(events: &[Event]) -> Vec<&str> {
    events.iter().map(Event::id).collect()
}

#[tokio::test]
async fn stream_events_reach_matching_subscribers() {
    bizdesk_observability::init_pretty();
    let srv = TestServer::spawn().await;
    let hub = srv.hub();

    let orders = Arc::new(Mutex::new(Vec::new()));
    let sink = orders.clone();
    hub.subscribe("order.*", move |e| sink.lock().unwrap().push(e.id().to_string()), false)
        .unwrap();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;

    srv.backend.emit(Frame::Event(wire_event("e1", "order.created")));
    srv.backend.emit(Frame::Event(wire_event("e2", "invoice.paid")));

    assert_eq!(next_id(&mut all).await, "e1");
    assert_eq!(next_id(&mut all).await, "e2");
    assert_eq!(*orders.lock().unwrap(), vec!["e1".to_string()]);

    let snapshot = hub.snapshot(None, None).unwrap();
    assert_eq!(ids(&snapshot), vec!["e2", "e1"]);
    assert_eq!(snapshot[1].payload().get("ref"), Some(&json!("e1")));
    assert_eq!(hub.stats().accepted, 2);

    assert_eq!(
        srv.backend.auth_headers(),
        vec![Some(format!("Bearer {TOKEN}"))]
    );
}

#[tokio::test]
async fn malformed_and_heartbeat_messages_are_skipped() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;

    srv.backend.emit(Frame::Raw("not json at all".to_string()));
    srv.backend.emit(Frame::Heartbeat);
    srv.backend.emit(Frame::Event(json!({"event_type": "order.created"})));
    srv.backend.emit(Frame::Event(wire_event("e3", "order.created")));

    assert_eq!(next_id(&mut all).await, "e3");
    assert_eq!(hub.connection_state(), ConnectionState::Connected);
    assert_eq!(hub.snapshot(None, None).unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_stream_reports_error_without_retrying() {
    let srv = TestServer::spawn().await;
    srv.backend.set_mode(StreamMode::Reject);
    let hub = srv.hub();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Error).await;

    let error = hub.last_error().expect("error message recorded");
    assert!(error.contains("503"), "unexpected error: {error}");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(srv.backend.stream_hits(), 1);
    assert_eq!(hub.connection_state(), ConnectionState::Error);

    // A manual reconnect clears the error once the stream opens.
    srv.backend.set_mode(StreamMode::Live);
    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;
    assert_eq!(hub.last_error(), None);
    assert_eq!(srv.backend.stream_hits(), 2);
}

#[tokio::test]
async fn server_closing_the_stream_is_an_error() {
    let srv = TestServer::spawn().await;
    srv.backend.set_mode(StreamMode::Finite);
    srv.backend
        .set_finite(vec![Frame::Event(wire_event("e1", "order.created"))]);
    let hub = srv.hub();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Error).await;

    let error = hub.last_error().unwrap();
    assert!(error.contains("closed"), "unexpected error: {error}");
    eventually("e1 buffered", || {
        hub.snapshot(None, None).map(|s| s.len() == 1).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn unreachable_backend_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let hub = RealtimeHub::new(RealtimeConfig::new(format!("http://{addr}"))).unwrap();
    hub.connect();
    wait_for_state(&hub, ConnectionState::Error).await;
    assert!(hub.last_error().unwrap().contains("could not reach"));
}

#[tokio::test]
async fn backoff_policy_retries_until_the_attempt_limit() {
    let srv = TestServer::spawn().await;
    srv.backend.set_mode(StreamMode::Reject);
    let hub = RealtimeHub::new(srv.config().with_reconnect(ReconnectPolicy::Backoff {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(40),
        max_attempts: Some(3),
    }))
    .unwrap();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Error).await;

    // First attempt plus three retries.
    assert_eq!(srv.backend.stream_hits(), 4);
    assert!(hub.last_error().unwrap().contains("503"));
}

#[tokio::test]
async fn backoff_policy_recovers_when_the_backend_returns() {
    let srv = TestServer::spawn().await;
    srv.backend.set_mode(StreamMode::Reject);
    let hub = RealtimeHub::new(
        srv.config()
            .with_reconnect(ReconnectPolicy::Backoff {
                initial: Duration::from_millis(20),
                max: Duration::from_millis(20),
                max_attempts: None,
            }),
    )
    .unwrap();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    hub.connect();
    eventually("a few rejected attempts", || srv.backend.stream_hits() >= 2).await;
    assert_eq!(hub.connection_state(), ConnectionState::Connecting);
    assert!(hub.last_error().is_some());

    srv.backend.set_mode(StreamMode::Live);
    wait_for_state(&hub, ConnectionState::Connected).await;
    assert_eq!(hub.last_error(), None);

    srv.backend.emit(Frame::Event(wire_event("e1", "order.created")));
    assert_eq!(next_id(&mut all).await, "e1");
}

#[tokio::test]
async fn nothing_is_delivered_after_disconnect() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();

    let orders = Arc::new(Mutex::new(Vec::new()));
    let sink = orders.clone();
    hub.subscribe("order.*", move |e| sink.lock().unwrap().push(e.id().to_string()), false)
        .unwrap();
    // Registered after the callback, so it sees each event once the callback has.
    let mut all = hub.subscribe_channel("*", false).unwrap();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;
    srv.backend.emit(Frame::Event(wire_event("e1", "order.created")));
    assert_eq!(next_id(&mut all).await, "e1");
    assert_eq!(*orders.lock().unwrap(), vec!["e1".to_string()]);

    hub.disconnect();
    hub.disconnect();
    assert_eq!(hub.connection_state(), ConnectionState::Disconnected);

    srv.backend.emit(Frame::Event(wire_event("e2", "order.created")));
    assert_quiet(&mut all).await;
    assert_eq!(hub.connection_state(), ConnectionState::Disconnected);
    assert_eq!(*orders.lock().unwrap(), vec!["e1".to_string()]);

    // Buffer survives a disconnect.
    assert_eq!(ids(&hub.snapshot(Some("order.created"), None).unwrap()), vec!["e1"]);
    assert_eq!(ids(&hub.snapshot(None, None).unwrap()), vec!["e1"]);
}

#[tokio::test]
async fn connect_while_connected_is_a_noop() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();

    hub.connect();
    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;
    hub.connect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(srv.backend.stream_hits(), 1);
    assert_eq!(hub.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn poll_skips_events_already_seen_on_the_stream() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;
    srv.backend.emit(Frame::Event(wire_event("E1", "order.created")));
    assert_eq!(next_id(&mut all).await, "E1");

    srv.backend.set_recent(
        StatusCode::OK,
        json!([wire_event("E2", "order.shipped"), wire_event("E1", "order.created")]),
    );
    let poller = hub.start_polling(Duration::from_millis(20));

    assert_eq!(next_id(&mut all).await, "E2");
    eventually("several poll cycles", || srv.backend.recent_hits() >= 3).await;
    assert_quiet(&mut all).await;

    assert_eq!(ids(&hub.snapshot(None, None).unwrap()), vec!["E2", "E1"]);
    assert!(hub.stats().duplicates >= 1);
    poller.stop();
}

#[tokio::test]
async fn poll_batches_are_applied_oldest_first() {
    let srv = TestServer::spawn().await;
    srv.backend.set_recent(
        StatusCode::OK,
        json!({
            "events": [
                wire_event("p3", "invoice.paid"),
                {"event_type": "broken"},
                wire_event("p2", "order.created"),
                wire_event("p1", "order.created"),
            ]
        }),
    );
    let hub = srv.hub();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    let _poller = hub.start_polling(Duration::from_millis(20));

    assert_eq!(next_id(&mut all).await, "p1");
    assert_eq!(next_id(&mut all).await, "p2");
    assert_eq!(next_id(&mut all).await, "p3");
    assert_eq!(ids(&hub.snapshot(None, None).unwrap()), vec!["p3", "p2", "p1"]);
    assert_eq!(ids(&hub.snapshot(Some("order.*"), Some(1)).unwrap()), vec!["p2"]);
}

#[tokio::test]
async fn poll_errors_do_not_stop_the_poller() {
    let srv = TestServer::spawn().await;
    srv.backend
        .set_recent(StatusCode::INTERNAL_SERVER_ERROR, json!({"detail": "boom"}));
    let hub = srv.hub();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    let _poller = hub.start_polling(Duration::from_millis(20));
    eventually("failing polls", || srv.backend.recent_hits() >= 3).await;
    assert!(all.try_recv().is_err());

    srv.backend
        .set_recent(StatusCode::OK, json!([wire_event("r1", "order.created")]));
    assert_eq!(next_id(&mut all).await, "r1");
}

#[tokio::test]
async fn stopped_poller_makes_no_further_requests() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();
    let mut all = hub.subscribe_channel("*", false).unwrap();

    let poller = hub.start_polling(Duration::from_millis(20));
    eventually("first poll", || srv.backend.recent_hits() >= 1).await;

    poller.stop();
    poller.stop();
    assert!(poller.is_stopped());
    let hits = srv.backend.recent_hits();

    srv.backend
        .set_recent(StatusCode::OK, json!([wire_event("late", "order.created")]));
    assert_quiet(&mut all).await;
    assert!(srv.backend.recent_hits() <= hits + 1);

    // Dropping the handle stops a poller too.
    let dropped = hub.start_polling(Duration::from_millis(20));
    assert_eq!(next_id(&mut all).await, "late");
    drop(dropped);
    let hits = srv.backend.recent_hits();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(srv.backend.recent_hits() <= hits + 1);
}

#[tokio::test]
async fn fallback_mode_polls_only_while_the_stream_is_down() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();

    let _poller = hub.start_polling_with(Duration::from_millis(20), PollMode::WhenDisconnected);
    eventually("polling while disconnected", || srv.backend.recent_hits() >= 2).await;

    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let hits = srv.backend.recent_hits();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(srv.backend.recent_hits() <= hits + 1);

    hub.disconnect();
    eventually("polling resumes", || srv.backend.recent_hits() >= hits + 3).await;
}

#[tokio::test]
async fn publish_posts_to_the_backend_without_touching_the_buffer() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    hub.subscribe("*", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }, false)
    .unwrap();

    hub.publish("order.created", json!({"order_id": 7})).await.unwrap();
    hub.publish("ping", JsonValue::Null).await.unwrap();

    assert_eq!(
        srv.backend.published(),
        vec![
            json!({"type": "order.created", "data": {"order_id": 7}}),
            json!({"type": "ping", "data": {}}),
        ]
    );
    assert!(srv
        .backend
        .auth_headers()
        .iter()
        .all(|h| h.as_deref() == Some("Bearer test-token")));
    assert!(hub.snapshot(None, None).unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn publish_failures_are_returned_to_the_caller() {
    let srv = TestServer::spawn().await;
    srv.backend.set_publish_status(StatusCode::BAD_REQUEST);
    let hub = srv.hub();

    match hub.publish("order.created", json!({})).await {
        Err(PublishError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body, "event type not allowed");
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    assert!(matches!(
        hub.publish("", json!({})).await,
        Err(PublishError::Invalid(_))
    ));
    assert!(matches!(
        hub.publish("order.created", json!("text")).await,
        Err(PublishError::Invalid(_))
    ));
    assert_eq!(srv.backend.published().len(), 1);
}

#[tokio::test]
async fn fetch_stats_reads_backend_counters() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();

    let stats = hub.fetch_stats().await.unwrap();
    assert_eq!(stats.count("total_events"), Some(42));
    assert_eq!(stats.get("by_type").unwrap()["invoice.paid"], 12);
}

#[tokio::test]
async fn shutdown_tears_everything_down() {
    let srv = TestServer::spawn().await;
    let hub = srv.hub();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    hub.subscribe("*", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }, false)
    .unwrap();

    hub.connect();
    wait_for_state(&hub, ConnectionState::Connected).await;
    srv.backend.emit(Frame::Event(wire_event("e1", "order.created")));
    eventually("e1 delivered", || calls.load(Ordering::SeqCst) == 1).await;

    srv.backend
        .set_recent(StatusCode::OK, json!([wire_event("p1", "order.created")]));
    let poller = hub.start_polling(Duration::from_millis(20));

    hub.shutdown();
    assert!(hub.is_shut_down());
    assert_eq!(hub.connection_state(), ConnectionState::Disconnected);
    assert!(hub.snapshot(None, None).unwrap().is_empty());
    assert!(poller.is_stopped());

    let polls = srv.backend.recent_hits();
    srv.backend.emit(Frame::Event(wire_event("e2", "order.created")));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(srv.backend.recent_hits() <= polls + 1);
    assert!(calls.load(Ordering::SeqCst) <= 1);

    hub.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(srv.backend.stream_hits(), 1);
}
