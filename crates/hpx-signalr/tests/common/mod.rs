//! Shared fixtures: scripted transport and event sources, a recording handler
//! and a hyper mock server.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use hpx_signalr::{
    ClientConfig, Delivery, EventSource, EventSourceFactory, HandlerResult, HttpResponse,
    HttpTransport, HubMessage, ReadyState, SequenceCounter, SignalRClient, SignalRError,
    SignalRHandler, SignalRResult, StreamEvent,
};
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::{
    HeaderMap, Request, Response, StatusCode,
    body::{Bytes, Frame, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{Notify, mpsc},
};
use url::Url;

// ---------------------------------------------------------------------------
// Scripted HTTP transport
// ---------------------------------------------------------------------------

/// One request seen by [`FakeTransport`].
#[derive(Clone, Debug)]
pub struct Call {
    pub method: &'static str,
    pub url: Url,
    pub form: Vec<(String, String)>,
}

impl Call {
    /// Last path segment: `negotiate`, `start` or `send`.
    pub fn endpoint(&self) -> String {
        self.url
            .path_segments()
            .and_then(|mut s| s.next_back().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// The `data` form field decoded as JSON.
    pub fn data(&self) -> Value {
        let raw = self
            .form
            .iter()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.as_str())
            .expect("data field");
        serde_json::from_str(raw).expect("data is JSON")
    }
}

/// Answers by endpoint name and records every call. Calls to a held
/// endpoint are recorded, then wait for [`FakeTransport::release`].
#[derive(Debug, Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, HttpResponse>>,
    calls: Mutex<Vec<Call>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeTransport {
    pub fn new(protocol_version: &str) -> Arc<Self> {
        let transport = Self::default();
        transport.respond(
            "negotiate",
            StatusCode::OK,
            &serde_json::json!({
                "ConnectionId": "conn-1",
                "ConnectionToken": "tok/1+",
                "ProtocolVersion": protocol_version,
            })
            .to_string(),
        );
        transport.respond("start", StatusCode::OK, r#"{"Response":"started"}"#);
        transport.respond("send", StatusCode::OK, "{}");
        Arc::new(transport)
    }

    pub fn respond(&self, endpoint: &str, status: StatusCode, body: &str) {
        self.responses
            .lock()
            .expect("lock")
            .insert(endpoint.to_string(), HttpResponse::new(status, body));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint() == endpoint)
            .collect()
    }

    /// Park calls to `endpoint` until released.
    pub fn hold(&self, endpoint: &str) {
        self.holds
            .lock()
            .expect("lock")
            .insert(endpoint.to_string(), Arc::new(Notify::new()));
    }

    /// Let the parked call to `endpoint` finish and stop holding new ones.
    pub fn release(&self, endpoint: &str) {
        if let Some(gate) = self.holds.lock().expect("lock").remove(endpoint) {
            gate.notify_one();
        }
    }

    async fn answer(&self, call: Call) -> SignalRResult<HttpResponse> {
        let endpoint = call.endpoint();
        let gate = self.holds.lock().expect("lock").get(&endpoint).cloned();
        self.calls.lock().expect("lock").push(call);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self
            .responses
            .lock()
            .expect("lock")
            .get(&endpoint)
            .cloned()
            .unwrap_or_else(|| HttpResponse::new(StatusCode::NOT_FOUND, "")))
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, url: &Url) -> SignalRResult<HttpResponse> {
        self.answer(Call {
            method: "GET",
            url: url.clone(),
            form: Vec::new(),
        })
        .await
    }

    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> SignalRResult<HttpResponse> {
        self.answer(Call {
            method: "POST",
            url: url.clone(),
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Scripted event sources
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FakeShared {
    initial_url: Url,
    target: Mutex<Url>,
    state: Mutex<ReadyState>,
    events: mpsc::Sender<StreamEvent>,
    closed: AtomicBool,
}

/// Test-side handle to a source the client created.
#[derive(Clone, Debug)]
pub struct FakeSourceHandle {
    shared: Arc<FakeShared>,
}

impl FakeSourceHandle {
    /// Deliver an event as the transport would. Delivery failures (the
    /// client stopped listening) are ignored.
    pub async fn emit(&self, event: StreamEvent) {
        match &event {
            StreamEvent::Open => *self.shared.state.lock().expect("lock") = ReadyState::Open,
            StreamEvent::Closed { state } => *self.shared.state.lock().expect("lock") = *state,
            _ => {}
        }
        let _ = self.shared.events.send(event).await;
    }

    pub async fn open(&self) {
        self.emit(StreamEvent::Open).await;
    }

    pub async fn message(&self, data: &str) {
        self.emit(StreamEvent::Message(data.to_string())).await;
    }

    pub async fn closed(&self, state: ReadyState) {
        self.emit(StreamEvent::Closed { state }).await;
    }

    pub async fn error(&self, err: SignalRError) {
        self.emit(StreamEvent::Error(err)).await;
    }

    pub fn initial_url(&self) -> Url {
        self.shared.initial_url.clone()
    }

    pub fn target_url(&self) -> Url {
        self.shared.target.lock().expect("lock").clone()
    }

    pub fn state(&self) -> ReadyState {
        *self.shared.state.lock().expect("lock")
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

struct FakeSource {
    shared: Arc<FakeShared>,
}

impl EventSource for FakeSource {
    fn start(&mut self) {
        let mut state = self.shared.state.lock().expect("lock");
        if *state == ReadyState::Raw {
            *state = ReadyState::Connecting;
        }
    }

    fn close(&mut self) {
        *self.shared.state.lock().expect("lock") = ReadyState::Shutdown;
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    fn state(&self) -> ReadyState {
        *self.shared.state.lock().expect("lock")
    }

    fn target_url(&self) -> Url {
        self.shared.target.lock().expect("lock").clone()
    }

    fn set_target_url(&self, url: Url) {
        *self.shared.target.lock().expect("lock") = url;
    }
}

/// Records every source the client creates.
#[derive(Debug, Default)]
pub struct FakeSources {
    created: Mutex<Vec<FakeSourceHandle>>,
}

impl FakeSources {
    pub fn count(&self) -> usize {
        self.created.lock().expect("lock").len()
    }

    pub fn get(&self, index: usize) -> FakeSourceHandle {
        self.created.lock().expect("lock")[index].clone()
    }

    pub fn last(&self) -> FakeSourceHandle {
        self.created
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("a source was created")
    }
}

impl EventSourceFactory for FakeSources {
    fn create(&self, url: Url, events: mpsc::Sender<StreamEvent>) -> Box<dyn EventSource> {
        let shared = Arc::new(FakeShared {
            initial_url: url.clone(),
            target: Mutex::new(url),
            state: Mutex::new(ReadyState::Raw),
            events,
            closed: AtomicBool::new(false),
        });
        self.created.lock().expect("lock").push(FakeSourceHandle {
            shared: Arc::clone(&shared),
        });
        Box::new(FakeSource { shared })
    }
}

// ---------------------------------------------------------------------------
// Recording handler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RecorderState {
    delivery: Delivery,
    messages: Mutex<Vec<HubMessage>>,
    batches: Mutex<Vec<Vec<HubMessage>>>,
    errors: Mutex<Vec<String>>,
    keepalives: AtomicUsize,
    closed: AtomicUsize,
    aborted: AtomicUsize,
}

/// Handler that records every callback.
///
/// Messages for method `explode` fail; messages for method `ping` are answered
/// with a background `pong` send.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    state: Arc<RecorderState>,
}

impl Recorder {
    pub fn with_delivery(delivery: Delivery) -> Self {
        Self {
            state: Arc::new(RecorderState {
                delivery,
                ..RecorderState::default()
            }),
        }
    }

    pub fn messages(&self) -> Vec<HubMessage> {
        self.state.messages.lock().expect("lock").clone()
    }

    pub fn batches(&self) -> Vec<Vec<HubMessage>> {
        self.state.batches.lock().expect("lock").clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.state.errors.lock().expect("lock").clone()
    }

    pub fn keepalives(&self) -> usize {
        self.state.keepalives.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.state.aborted.load(Ordering::SeqCst)
    }
}

impl SignalRHandler for Recorder {
    fn handle(&self, client: &SignalRClient, message: &HubMessage) -> HandlerResult {
        self.state
            .messages
            .lock()
            .expect("lock")
            .push(message.clone());
        match message.method() {
            "explode" => Err("handler exploded".into()),
            "ping" => {
                let pong =
                    client.send_background(message.hub(), "pong", message.args().to_vec(), None);
                tokio::spawn(async move {
                    let _ = pong.await;
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn delivery(&self) -> Delivery {
        self.state.delivery
    }

    fn handle_batch(&self, _client: &SignalRClient, messages: &[HubMessage]) -> HandlerResult {
        self.state
            .batches
            .lock()
            .expect("lock")
            .push(messages.to_vec());
        Ok(())
    }

    fn keepalive(&self, _client: &SignalRClient) {
        self.state.keepalives.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_closed(&self, _client: &SignalRClient) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_aborted(&self, _client: &SignalRClient) {
        self.state.aborted.fetch_add(1, Ordering::SeqCst);
    }

    fn error(&self, _client: &SignalRClient, error: &SignalRError) {
        self.state
            .errors
            .lock()
            .expect("lock")
            .push(error.to_string());
    }
}

// ---------------------------------------------------------------------------
// Client harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub client: SignalRClient,
    pub http: Arc<FakeTransport>,
    pub sources: Arc<FakeSources>,
    pub recorder: Recorder,
    pub sequence: SequenceCounter,
}

pub fn config() -> ClientConfig {
    ClientConfig::new("hub.example.com")
        .use_tls(false)
        .hubs(["lobby"])
}

pub fn harness(protocol_version: &str) -> Harness {
    harness_with(config(), protocol_version, Recorder::default())
}

pub fn harness_with(config: ClientConfig, protocol_version: &str, recorder: Recorder) -> Harness {
    let http = FakeTransport::new(protocol_version);
    let sources = Arc::new(FakeSources::default());
    let sequence = SequenceCounter::new();
    let client = SignalRClient::builder(config, recorder.clone())
        .http_transport(http.clone())
        .event_sources(sources.clone())
        .sequence(sequence.clone())
        .build()
        .expect("client");
    Harness {
        client,
        http,
        sources,
        recorder,
        sequence,
    }
}

impl Harness {
    /// Connect, open the stream and deliver `initialized`.
    pub async fn connect_ready(&self) -> FakeSourceHandle {
        self.client.connect().await.expect("connect");
        let source = self.sources.last();
        source.open().await;
        source.message("initialized").await;
        self.client
            .wait_for_ready_timeout(Duration::from_secs(5))
            .await
            .expect("ready");
        source
    }
}

/// Poll `condition` until it holds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Mock HTTP server
// ---------------------------------------------------------------------------

/// A request seen by [`MockServer`].
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }
}

/// What the mock server answers.
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
    /// Keep the body open after `body` is written.
    pub hold_open: bool,
}

impl MockResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into(),
            headers: Vec::new(),
            hold_open: false,
        }
    }

    pub fn sse(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: body.into(),
            headers: Vec::new(),
            hold_open: false,
        }
    }

    /// An event stream that stays open after writing `body`.
    pub fn sse_open(body: impl Into<String>) -> Self {
        Self {
            hold_open: true,
            ..Self::sse(body)
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{path}", self.addr)).expect("url")
    }
}

/// Start a mock server that accepts any number of connections and answers
/// every request with `respond`.
pub async fn start_server<F>(respond: F) -> MockServer
where
    F: Fn(&Recorded) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let seen = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let respond = Arc::clone(&respond);
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(
                        TokioIo::new(stream),
                        service_fn(move |req: Request<Incoming>| {
                            let respond = Arc::clone(&respond);
                            let seen = Arc::clone(&seen);
                            async move {
                                let method = req.method().to_string();
                                let uri = req.uri().to_string();
                                let headers = req.headers().clone();
                                let body = match req.into_body().collect().await {
                                    Ok(collected) => {
                                        String::from_utf8_lossy(&collected.to_bytes()).into_owned()
                                    }
                                    Err(_) => String::new(),
                                };
                                let recorded = Recorded {
                                    method,
                                    uri,
                                    headers,
                                    body,
                                };
                                let reply = respond(&recorded);
                                seen.lock().expect("lock").push(recorded);

                                let mut builder = Response::builder()
                                    .status(reply.status)
                                    .header("content-type", reply.content_type);
                                for (name, value) in &reply.headers {
                                    builder = builder.header(*name, value.as_str());
                                }
                                let chunk = Bytes::from(reply.body);
                                let body: UnsyncBoxBody<Bytes, Infallible> = if reply.hold_open {
                                    let frames = futures_util::stream::iter([Ok(Frame::data(chunk))])
                                        .chain(futures_util::stream::pending());
                                    StreamBody::new(frames).boxed_unsync()
                                } else {
                                    Full::new(chunk).boxed_unsync()
                                };
                                let resp = builder.body(body).expect("build response");
                                Ok::<_, Infallible>(resp)
                            }
                        }),
                    )
                    .await;
            });
        }
    });

    MockServer { addr, requests }
}
