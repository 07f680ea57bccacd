//! Shared fakes for the client integration tests: a scripted socket
//! transport and an in-memory HTTP helper.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sc_api::{ApiRequest, Requester};
use sc_client::ChatClient;
use sc_core::config::ClientConfig;
use sc_core::error::{ChatError, ChatResult};
use sc_socket::{Socket, Transport, TransportEvent};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub enum Step {
    Accept(String),
    Refuse(ChatError),
}

/// Server side of one accepted socket.
pub struct ServerEnd {
    tx: mpsc::UnboundedSender<TransportEvent>,
    pub sent: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<Mutex<Option<u16>>>,
}

impl ServerEnd {
    pub fn push(&self, frame: Value) {
        let _ = self.tx.send(TransportEvent::Message(frame.to_string()));
    }

    /// Drop the connection as a network failure would.
    pub fn drop_connection(&self) {
        let _ = self.tx.send(TransportEvent::Close {
            code: 1006,
            reason: "abnormal closure".into(),
        });
    }

    pub fn closed_with(&self) -> Option<u16> {
        *self.closed.lock().unwrap()
    }
}

struct FakeSocket {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<Mutex<Option<u16>>>,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    async fn send(&mut self, text: String) -> ChatResult<()> {
        self.sent
            .send(text)
            .map_err(|_| ChatError::Socket("peer gone".into()))
    }

    async fn close(&mut self, code: u16, _reason: &str) -> ChatResult<()> {
        *self.closed.lock().unwrap() = Some(code);
        Ok(())
    }
}

pub struct FakeTransport {
    script: Mutex<VecDeque<Step>>,
    opens: AtomicUsize,
    urls: Mutex<Vec<String>>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeTransport {
    pub fn new(steps: Vec<Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(steps.into()),
            opens: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            servers,
        });
        (transport, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, url: &str) -> ChatResult<Box<dyn Socket>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Accept(handshake)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let closed = Arc::new(Mutex::new(None));
                tx.send(TransportEvent::Message(handshake)).unwrap();
                let _ = self.servers.send(ServerEnd {
                    tx,
                    sent: sent_rx,
                    closed: Arc::clone(&closed),
                });
                Ok(Box::new(FakeSocket {
                    rx,
                    sent: sent_tx,
                    closed,
                }))
            }
            Some(Step::Refuse(e)) => Err(e),
            None => Err(ChatError::Socket("script exhausted".into())),
        }
    }
}

type Route = Box<dyn Fn(&ApiRequest) -> ChatResult<Value> + Send + Sync>;

/// Answers requests from a routing closure and records every request.
pub struct FakeRequester {
    requests: Mutex<Vec<ApiRequest>>,
    route: Mutex<Route>,
}

impl FakeRequester {
    pub fn new(route: impl Fn(&ApiRequest) -> ChatResult<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            route: Mutex::new(Box::new(route)),
        })
    }

    pub fn set_route(
        &self,
        route: impl Fn(&ApiRequest) -> ChatResult<Value> + Send + Sync + 'static,
    ) {
        *self.route.lock().unwrap() = Box::new(route);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Recorded requests whose path is exactly `path`.
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

#[async_trait]
impl Requester for FakeRequester {
    async fn send(&self, request: ApiRequest) -> ChatResult<Value> {
        self.requests.lock().unwrap().push(request.clone());
        (self.route.lock().unwrap())(&request)
    }
}

pub fn ok_frame(connection_id: &str) -> String {
    json!({
        "type": "connection.ok",
        "connection_id": connection_id,
        "me": { "id": "alice", "name": "Alice" },
    })
    .to_string()
}

/// Seconds after a fixed epoch, as an RFC 3339 string.
pub fn ts(secs: i64) -> String {
    chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0)
        .unwrap()
        .to_rfc3339()
}

pub fn message(id: &str, user: &str, secs: i64) -> Value {
    json!({
        "id": id,
        "text": format!("text {id}"),
        "type": "regular",
        "user": { "id": user },
        "created_at": ts(secs),
    })
}

pub fn snapshot(cid: &str, messages: Vec<Value>) -> Value {
    let (channel_type, id) = cid.split_once(':').unwrap();
    json!({
        "channel": { "id": id, "type": channel_type, "cid": cid },
        "messages": messages,
        "members": [{ "user_id": "alice", "user": { "id": "alice" } }],
    })
}

/// Routes `POST /channels/{type}/{id}/query` to an empty snapshot of that
/// channel and everything else to `{}`.
pub fn default_route(request: &ApiRequest) -> ChatResult<Value> {
    if let Some(rest) = request.path.strip_prefix("/channels/") {
        if let Some(channel) = rest.strip_suffix("/query") {
            let cid = channel.replacen('/', ":", 1);
            return Ok(snapshot(&cid, vec![]));
        }
    }
    Ok(json!({}))
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("key");
    config.api.base_url = "https://chat.example.com".into();
    config.connection.ping_interval_ms = 5_000;
    config.connection.health_grace_ms = 5_000;
    config.connection.handshake_timeout_ms = 500;
    config.connection.offline_grace_ms = 5_000;
    config.connection.reconnect_base_delay_ms = 5;
    config.connection.reconnect_max_delay_ms = 20;
    config.connection.jitter_factor = 0.0;
    config.state.clean_interval_ms = 50;
    config
}

pub fn client(transport: Arc<FakeTransport>, requester: Arc<FakeRequester>) -> ChatClient {
    ChatClient::with_collaborators(test_config(), requester, transport).unwrap()
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
