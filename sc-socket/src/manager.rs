//! Stable connection manager.
//!
//! Keeps one logical chat session alive across any number of physical
//! sockets: connect once, hand every caller the same handshake result,
//! reconnect with exponential backoff and jitter when the socket dies or
//! goes silent, and run the recovery hook before a reconnected session is
//! declared healthy again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use sc_core::config::ConnectionConfig;
use sc_core::constants::{self, codes, events};
use sc_core::error::{ChatError, ChatResult};
use sc_core::token::AuthType;
use sc_models::{Event, EventType, User};

use crate::state::{ConnectionOpen, ConnectionState};
use crate::transport::{Socket, Transport, TransportEvent};

/// Configuration for reconnection backoff. Attempts are unbounded.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ReconnectConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            jitter_factor: config.jitter_factor,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt: `base * 2^attempt`, capped at
    /// `max_delay`, +/- `jitter_factor`, never below half the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let exponential = (base * 2.0_f64.powi(attempt.min(31) as i32)).min(max);
        let jitter_range = exponential * self.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let delay = (exponential + jitter).min(max).max(base * 0.5);

        Duration::from_secs_f64(delay)
    }
}

/// Heartbeat and handshake timing.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// The client pings this long after the last server health check.
    pub ping_interval: Duration,
    /// Silence tolerated on top of `ping_interval` before the socket is
    /// considered dead.
    pub grace: Duration,
    /// Maximum wait for the handshake frame.
    pub handshake_timeout: Duration,
    /// Outage length after which `connection.changed` (offline) is emitted.
    pub offline_grace: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for HealthCheckConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            grace: config.health_grace(),
            handshake_timeout: config.handshake_timeout(),
            offline_grace: config.offline_grace(),
        }
    }
}

/// Identity and credentials of the session being connected.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// `ws://` or `wss://` base, without the `/connect` path.
    pub ws_base_url: String,
    pub api_key: String,
    pub user: User,
    /// Stable for the whole session, across reconnects.
    pub client_id: String,
    pub token: String,
    pub auth_type: AuthType,
    /// Limit on the encoded `json` query parameter.
    pub max_query_len: usize,
}

/// Build the `/connect` URL for a session.
///
/// Fails with a configuration error when the encoded user details exceed
/// `max_query_len`; nothing is sent in that case.
pub fn build_connect_url(params: &ConnectParams) -> ChatResult<String> {
    let payload = json!({
        "user_id": params.user.id,
        "user_details": params.user,
        "client_id": params.client_id,
        "server_determines_connection_id": true,
    })
    .to_string();

    let encoded_len: usize = url::form_urlencoded::byte_serialize(payload.as_bytes())
        .map(str::len)
        .sum();
    if encoded_len > params.max_query_len {
        return Err(ChatError::Config(format!(
            "user details too large for the connect request ({encoded_len} encoded characters, limit {})",
            params.max_query_len
        )));
    }

    let base = format!("{}/connect", params.ws_base_url.trim_end_matches('/'));
    let mut url = Url::parse(&base)
        .map_err(|e| ChatError::Config(format!("invalid websocket url '{base}': {e}")))?;
    url.query_pairs_mut()
        .append_pair("json", &payload)
        .append_pair("api_key", &params.api_key)
        .append_pair("authorization", &params.token)
        .append_pair("stream-auth-type", params.auth_type.as_str())
        .append_pair("X-Stream-Client", &constants::user_agent());
    Ok(url.into())
}

/// Receives what the connection produces.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Every inbound event in arrival order, including the handshake's
    /// `connection.ok` and the synthetic `connection.changed`. The next
    /// frame is not read until this returns.
    async fn on_event(&self, event: Event);

    /// Resynchronize after a reconnect that follows an earlier success.
    /// Runs before the connection is marked ready; an error sends the
    /// manager back into its retry loop.
    async fn recover(&self, open: &ConnectionOpen) -> ChatResult<()>;
}

#[derive(Debug, Clone)]
enum Readiness {
    Pending,
    Ready(Arc<ConnectionOpen>),
    Failed(ChatError),
}

enum AttemptError {
    /// Give up and reject everyone waiting.
    Fatal(ChatError),
    /// Back off and try again.
    Retry(ChatError),
    Shutdown,
}

enum PumpExit {
    Shutdown,
    Lost(String),
}

/// Tracks an outage so listeners hear about it once it outlives the grace.
#[derive(Default)]
struct OfflineNotice {
    since: Option<Instant>,
    announced: bool,
}

impl OfflineNotice {
    fn start(&mut self) {
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
    }

    fn due_at(&self, grace: Duration) -> Option<Instant> {
        match (self.since, self.announced) {
            (Some(since), false) => Some(since + grace),
            _ => None,
        }
    }

    /// Clear the outage; returns whether it had been announced.
    fn reset(&mut self) -> bool {
        let announced = self.announced;
        *self = Self::default();
        announced
    }
}

struct Inner {
    url: String,
    client_id: String,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn ConnectionHandler>,
    reconnect_config: ReconnectConfig,
    health_config: HealthCheckConfig,
    state_tx: watch::Sender<ConnectionState>,
    ready_tx: watch::Sender<Readiness>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The logical connection of one session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct StableConnection {
    inner: Arc<Inner>,
}

impl StableConnection {
    /// Create a connection for the given session. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(
        params: ConnectParams,
        reconnect_config: ReconnectConfig,
        health_config: HealthCheckConfig,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> ChatResult<Self> {
        let url = build_connect_url(&params)?;
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (ready_tx, _) = watch::channel(Readiness::Pending);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                url,
                client_id: params.client_id,
                transport,
                handler,
                reconnect_config,
                health_config,
                state_tx,
                ready_tx,
                shutdown_tx,
                task: Mutex::new(None),
            }),
        })
    }

    /// The full connect URL, credentials included.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Id of the current physical connection, while one is ready.
    pub fn connection_id(&self) -> Option<String> {
        match &*self.inner.ready_tx.borrow() {
            Readiness::Ready(open) => Some(open.connection_id.clone()),
            _ => None,
        }
    }

    /// Backoff delay for a given attempt number.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.inner.reconnect_config.delay_for(attempt)
    }

    /// Start the session, or join the attempt already under way.
    ///
    /// Only the first call opens a socket; every caller resolves with the
    /// same handshake. Rejects only when the first handshake is refused
    /// (authentication or malformed response) or on `disconnect()`.
    pub async fn connect(&self) -> ChatResult<Arc<ConnectionOpen>> {
        {
            let mut task = self.inner.task.lock().await;
            let state = self.state();
            if state == ConnectionState::Idle {
                self.inner.set_state(ConnectionState::Connecting);
                info!("connecting client {}", self.inner.client_id);
                let inner = Arc::clone(&self.inner);
                *task = Some(tokio::spawn(inner.run()));
            } else {
                debug!("connect() while {state}, joining the current attempt");
            }
        }
        self.wait_ready().await
    }

    /// Wait until the connection is ready.
    ///
    /// Returns immediately while connected; during an outage it waits for
    /// the reconnect (and recovery) to finish.
    pub async fn wait_ready(&self) -> ChatResult<Arc<ConnectionOpen>> {
        let mut rx = self.inner.ready_tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                Readiness::Ready(open) => return Ok(open),
                Readiness::Failed(e) => return Err(e),
                Readiness::Pending if self.state() == ConnectionState::Idle => {
                    return Err(ChatError::Config("connect() has not been called".into()));
                }
                Readiness::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(ChatError::Disconnected);
            }
        }
    }

    /// Close the session for good.
    ///
    /// Stops the reconnect loop and timers and closes the socket with code
    /// 1000. Anyone waiting on readiness gets `ChatError::Disconnected`.
    pub async fn disconnect(&self) {
        if matches!(
            self.state(),
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return;
        }
        self.inner.set_state(ConnectionState::Closing);
        self.inner.shutdown_tx.send_replace(true);

        let handle = self.inner.task.lock().await.take();
        if let Some(mut handle) = handle {
            if timeout(Duration::from_secs(2), &mut handle).await.is_err() {
                warn!("connection task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.inner
            .ready_tx
            .send_replace(Readiness::Failed(ChatError::Disconnected));
        self.inner.set_state(ConnectionState::Closed);
        info!("client {} disconnected", self.inner.client_id);
    }
}

impl Inner {
    /// Update the connection state. Nothing leaves `Closing` except to `Closed`.
    fn set_state(&self, new_state: ConnectionState) {
        let mut old_state = None;
        self.state_tx.send_if_modified(|state| {
            let terminal = matches!(*state, ConnectionState::Closing | ConnectionState::Closed);
            if *state == new_state || (terminal && new_state != ConnectionState::Closed) {
                return false;
            }
            old_state = Some(*state);
            *state = new_state;
            true
        });
        if let Some(old) = old_state {
            info!("connection state: {old} -> {new_state}");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut attempt: u32 = 0;
        let mut ever_connected = false;
        let mut offline = OfflineNotice::default();

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.announce_offline_if_due(&mut offline).await;

            match self.establish(ever_connected, &mut shutdown).await {
                Ok((mut socket, open)) => {
                    if ever_connected {
                        info!("reconnected (connection {})", open.connection_id);
                    } else {
                        info!("connected (connection {})", open.connection_id);
                    }
                    attempt = 0;
                    ever_connected = true;

                    let handshake = open.event.clone();
                    self.ready_tx.send_replace(Readiness::Ready(open));
                    self.set_state(ConnectionState::Connected);
                    self.handler.on_event(handshake).await;
                    if offline.reset() {
                        self.handler.on_event(Event::connection_changed(true)).await;
                    }

                    match self.pump(socket.as_mut(), &mut shutdown).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Lost(reason) => {
                            warn!("connection lost: {reason}");
                            self.ready_tx.send_replace(Readiness::Pending);
                            self.set_state(ConnectionState::Recovering);
                            offline.start();
                        }
                    }
                }
                Err(AttemptError::Shutdown) => break,
                Err(AttemptError::Fatal(e)) => {
                    error!("connection refused: {e}");
                    self.ready_tx.send_replace(Readiness::Failed(e));
                    self.set_state(ConnectionState::Closed);
                    return;
                }
                Err(AttemptError::Retry(e)) => {
                    attempt = attempt.saturating_add(1);
                    warn!("connection attempt {attempt} failed: {e}");
                }
            }

            let delay = self.reconnect_config.delay_for(attempt);
            debug!("next connection attempt in {:.2}s", delay.as_secs_f64());
            if !self.backoff(delay, &mut shutdown, &mut offline).await {
                break;
            }
        }
        debug!("connection task finished");
    }

    /// Open a socket, read the handshake and, after a reconnect, recover.
    async fn establish(
        &self,
        ever_connected: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(Box<dyn Socket>, Arc<ConnectionOpen>), AttemptError> {
        let opened = tokio::select! {
            result = self.transport.open(&self.url) => result,
            _ = shutdown.changed() => return Err(AttemptError::Shutdown),
        };
        let mut socket = match opened {
            Ok(socket) => socket,
            Err(e) => return Err(classify_failure(e, ever_connected)),
        };

        let first = tokio::select! {
            frame = timeout(self.health_config.handshake_timeout, socket.recv()) => frame,
            _ = shutdown.changed() => {
                close_quietly(socket.as_mut(), "client disconnect").await;
                return Err(AttemptError::Shutdown);
            }
        };
        let open = match first {
            Ok(Some(TransportEvent::Message(text))) => match ConnectionOpen::from_handshake(&text) {
                Ok(open) => Arc::new(open),
                Err(e) => {
                    close_quietly(socket.as_mut(), "bad handshake").await;
                    return Err(classify_failure(e, ever_connected));
                }
            },
            Ok(Some(TransportEvent::Close { code, reason })) => {
                return Err(AttemptError::Retry(ChatError::Socket(format!(
                    "closed during handshake with code {code}: {reason}"
                ))));
            }
            Ok(Some(TransportEvent::Error(e))) => {
                return Err(AttemptError::Retry(ChatError::Socket(e)));
            }
            Ok(None) => {
                return Err(AttemptError::Retry(ChatError::Socket(
                    "socket ended before the handshake".into(),
                )));
            }
            Err(_) => {
                close_quietly(socket.as_mut(), "handshake timeout").await;
                return Err(AttemptError::Retry(ChatError::Timeout(format!(
                    "no handshake within {:?}",
                    self.health_config.handshake_timeout
                ))));
            }
        };

        if ever_connected {
            debug!("recovering state for connection {}", open.connection_id);
            let recovered = tokio::select! {
                result = self.handler.recover(&open) => result,
                _ = shutdown.changed() => {
                    close_quietly(socket.as_mut(), "client disconnect").await;
                    return Err(AttemptError::Shutdown);
                }
            };
            if let Err(e) = recovered {
                close_quietly(socket.as_mut(), "recovery failed").await;
                return Err(AttemptError::Retry(e));
            }
        }

        Ok((socket, open))
    }

    /// Read frames until the socket dies, goes silent, or shutdown.
    async fn pump(&self, socket: &mut dyn Socket, shutdown: &mut watch::Receiver<bool>) -> PumpExit {
        let interval = self.health_config.ping_interval;
        let dead_after = interval + self.health_config.grace;
        let mut last_frame = Instant::now();
        let mut next_ping = last_frame + interval;

        loop {
            let deadline = last_frame + dead_after;
            let received = tokio::select! {
                _ = shutdown.changed() => {
                    close_quietly(socket, "client disconnect").await;
                    return PumpExit::Shutdown;
                }
                frame = socket.recv() => frame,
                _ = sleep_until(next_ping) => {
                    let ping = json!([{
                        "type": events::HEALTH_CHECK,
                        "client_id": self.client_id,
                    }])
                    .to_string();
                    if let Err(e) = socket.send(ping).await {
                        return PumpExit::Lost(format!("health check ping failed: {e}"));
                    }
                    next_ping = Instant::now() + interval;
                    continue;
                }
                _ = sleep_until(deadline) => {
                    close_quietly(socket, "health check timeout").await;
                    return PumpExit::Lost(format!("no frame received for {dead_after:?}"));
                }
            };

            match received {
                Some(TransportEvent::Message(text)) => {
                    last_frame = Instant::now();
                    match Event::parse(&text) {
                        Ok(event) => {
                            if event.kind == EventType::HealthCheck {
                                next_ping = last_frame + interval;
                            }
                            self.handler.on_event(event).await;
                        }
                        Err(e) => warn!("dropping undecodable frame: {e}"),
                    }
                }
                Some(TransportEvent::Close { code, reason }) => {
                    return PumpExit::Lost(format!("closed by server with code {code}: {reason}"));
                }
                Some(TransportEvent::Error(e)) => return PumpExit::Lost(e),
                None => return PumpExit::Lost("socket stream ended".into()),
            }
        }
    }

    /// Sleep before the next attempt. Returns `false` on shutdown.
    async fn backoff(
        &self,
        delay: Duration,
        shutdown: &mut watch::Receiver<bool>,
        offline: &mut OfflineNotice,
    ) -> bool {
        let wake = Instant::now() + delay;
        loop {
            let notice = offline.due_at(self.health_config.offline_grace);
            tokio::select! {
                _ = sleep_until(wake) => return true,
                _ = shutdown.changed() => return false,
                _ = sleep_until(notice.unwrap_or(wake)), if notice.is_some() => {
                    self.announce_offline_if_due(offline).await;
                }
            }
        }
    }

    async fn announce_offline_if_due(&self, offline: &mut OfflineNotice) {
        if let Some(due) = offline.due_at(self.health_config.offline_grace) {
            if due <= Instant::now() {
                offline.announced = true;
                info!("connection offline for more than {:?}", self.health_config.offline_grace);
                self.handler.on_event(Event::connection_changed(false)).await;
            }
        }
    }
}

/// Before the first success, refused credentials and bad handshakes are
/// final. Afterwards every failure is retried.
fn classify_failure(e: ChatError, ever_connected: bool) -> AttemptError {
    if ever_connected {
        return AttemptError::Retry(e);
    }
    let fatal = matches!(e, ChatError::Api(_) | ChatError::Serialization(_)) || e.is_config();
    if fatal {
        AttemptError::Fatal(e)
    } else {
        AttemptError::Retry(e)
    }
}

async fn close_quietly(socket: &mut dyn Socket, reason: &str) {
    if let Err(e) = socket.close(codes::WS_CLOSED_SUCCESS, reason).await {
        debug!("ignoring close error: {e}");
    }
}
