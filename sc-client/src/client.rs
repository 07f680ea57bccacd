//! The chat client facade.
//!
//! [`ChatClient`] ties the pieces together: it owns the session (user,
//! token and the [`StableConnection`]), the event dispatcher with its
//! caches, and the HTTP helper. It is also the connection's handler, so
//! every inbound frame is dispatched from here and state recovery after a
//! reconnect runs here too.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sc_api::endpoints::channels::{self, QueryChannelsOptions};
use sc_api::endpoints::search::{self, SearchOptions};
use sc_api::endpoints::users::{self, QueryUsersOptions};
use sc_api::endpoints::SortParam;
use sc_api::response::{GuestResponse, QueryChannelsResponse, SearchResponse, UsersResponse};
use sc_api::{decode, ApiClient, ApiRequest, RequestAuth, Requester};
use sc_core::config::{ClientConfig, ConfigHandle, StateConfig};
use sc_core::error::{ChatError, ChatResult};
use sc_core::token::{self, AuthType};
use sc_models::{ChannelSnapshot, Cid, Event, User};
use sc_socket::{
    ConnectParams, ConnectionHandler, ConnectionOpen, ConnectionState, HealthCheckConfig,
    ReconnectConfig, StableConnection, Transport, TungsteniteTransport,
};

use crate::channel::Channel;
use crate::dispatcher::EventDispatcher;
use crate::listeners::{Listener, ListenerScope};

/// Id used for anonymous sessions.
const ANONYMOUS_USER_ID: &str = "!anon";

#[derive(Clone)]
struct Session {
    user_id: String,
    token: String,
    auth_type: AuthType,
    connection: StableConnection,
}

pub(crate) struct ClientInner {
    config: ConfigHandle,
    requester: Arc<dyn Requester>,
    transport: Arc<dyn Transport>,
    pub(crate) dispatcher: EventDispatcher,
    session: Mutex<Option<Session>>,
    clean_task: Mutex<Option<JoinHandle<()>>>,
}

/// Client for one chat app.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

impl ChatClient {
    /// Create a client talking to the real API over reqwest and
    /// tokio-tungstenite.
    pub fn new(config: ClientConfig) -> ChatResult<Self> {
        let requester = Arc::new(ApiClient::new(&config.api)?);
        Self::with_collaborators(config, requester, Arc::new(TungsteniteTransport::new()))
    }

    /// Create a client with a custom HTTP helper and socket transport.
    pub fn with_collaborators(
        config: ClientConfig,
        requester: Arc<dyn Requester>,
        transport: Arc<dyn Transport>,
    ) -> ChatResult<Self> {
        config.validate()?;
        info!(
            "chat client created for key {} ({})",
            config.api.api_key, config.api.base_url
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                config: ConfigHandle::new(config),
                requester,
                transport,
                dispatcher: EventDispatcher::new(),
                session: Mutex::new(None),
                clean_task: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    /// Point REST and socket traffic at another base URL. Takes effect for
    /// the next request and the next `set_user`.
    pub async fn set_base_url(&self, url: &str) {
        let mut config = self.inner.config.write().await;
        config.set_base_url(url);
        info!("base url set to {}", config.api.base_url);
    }

    /// Sign a user token with the configured API secret.
    pub async fn create_token(&self, user_id: &str, exp: Option<i64>) -> ChatResult<String> {
        let secret = self.inner.config.read().await.api.api_secret.clone();
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => token::create_user_token(&secret, user_id, exp, None),
            None => Err(ChatError::MissingConfig("api_secret".into())),
        }
    }

    /// Unsigned development token for apps with auth checks disabled.
    pub fn dev_token(user_id: &str) -> String {
        token::dev_token(user_id)
    }

    /// Connect as `user`.
    ///
    /// Identity problems (a session already open, a missing user id, a token
    /// issued for someone else) are reported before anything touches the
    /// network. Concurrent callers joining the same session get the same
    /// handshake.
    pub async fn set_user(
        &self,
        user: User,
        token: impl Into<String>,
    ) -> ChatResult<Arc<ConnectionOpen>> {
        self.start_session(user, token.into(), AuthType::Jwt).await
    }

    /// Connect without an identity.
    pub async fn set_anonymous_user(&self) -> ChatResult<Arc<ConnectionOpen>> {
        let user = User {
            anon: true,
            ..User::new(ANONYMOUS_USER_ID)
        };
        self.start_session(user, String::new(), AuthType::Anonymous)
            .await
    }

    /// Register a guest user with the server and connect as it.
    pub async fn set_guest_user(&self, user: User) -> ChatResult<Arc<ConnectionOpen>> {
        if self.inner.session().is_some() {
            return Err(already_connected());
        }
        let body = self.inner.send(users::guest(&user)?, None).await?;
        let GuestResponse { user, access_token } = decode(body)?;
        info!("registered guest user {}", user.id);
        self.set_user(user, access_token).await
    }

    async fn start_session(
        &self,
        user: User,
        token: String,
        auth_type: AuthType,
    ) -> ChatResult<Arc<ConnectionOpen>> {
        let config = self.inner.config.snapshot().await;
        let connection = self.inner.open_session(&config, user, token, auth_type)?;
        self.inner.start_clean_task(&config.state);

        match connection.connect().await {
            Ok(open) => {
                info!(
                    "connected as {} (connection {})",
                    connection.client_id(),
                    open.connection_id
                );
                Ok(open)
            }
            Err(e) => {
                warn!("connect failed: {e}");
                self.inner.close_session(Some(connection.client_id())).await;
                Err(e)
            }
        }
    }

    /// End the session: close the socket, stop background work and drop
    /// the caches. Listeners stay registered.
    pub async fn disconnect(&self) {
        self.inner.close_session(None).await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .session()
            .map(|s| s.connection.state())
            .unwrap_or(ConnectionState::Idle)
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.session().and_then(|s| s.connection.connection_id())
    }

    /// `{user_id}--{uuid}`, stable for the whole session.
    pub fn client_id(&self) -> Option<String> {
        self.inner
            .session()
            .map(|s| s.connection.client_id().to_string())
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.session().map(|s| s.user_id)
    }

    /// The connected user as last reported by the server.
    pub fn user(&self) -> Option<User> {
        self.inner.dispatcher.me()
    }

    /// A user from the session cache.
    pub fn get_user(&self, id: &str) -> Option<User> {
        self.inner.dispatcher.user(id)
    }

    /// Get the cached handle for a channel, creating it on first use.
    /// `data` only applies when the handle is created.
    pub fn channel(
        &self,
        channel_type: &str,
        id: &str,
        data: Option<Map<String, Value>>,
    ) -> ChatResult<Channel> {
        let cid = Cid::new(channel_type, id)?;
        Ok(self.inner.channel_for(cid, data))
    }

    /// Every channel the session has cached.
    pub fn active_channels(&self) -> Vec<Channel> {
        self.inner.dispatcher.channels()
    }

    pub fn on(
        &self,
        scope: impl Into<ListenerScope>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Listener {
        self.inner.dispatcher.listeners().on(scope, callback)
    }

    /// Register an existing listener handle again.
    pub fn add_listener(&self, scope: impl Into<ListenerScope>, listener: &Listener) {
        self.inner.dispatcher.listeners().add(scope, listener);
    }

    pub fn off(&self, scope: impl Into<ListenerScope>, listener: &Listener) -> bool {
        self.inner.dispatcher.listeners().off(scope, listener)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.inner.dispatcher.subscribe()
    }

    /// Feed an event through the dispatcher as if it came from the server.
    pub async fn dispatch_event(&self, event: Event) {
        self.inner.dispatcher.dispatch(event).await;
    }

    /// Query channels and merge each returned snapshot into its cache.
    pub async fn query_channels(&self, options: QueryChannelsOptions) -> ChatResult<Vec<Channel>> {
        let body = self
            .inner
            .request(channels::query_channels(&options)?)
            .await?;
        let response: QueryChannelsResponse = decode(body)?;
        let mut out = Vec::with_capacity(response.channels.len());
        for snapshot in &response.channels {
            let channel = self.inner.fold_snapshot(snapshot).await?;
            if options.watch {
                channel.set_watching(true);
            }
            out.push(channel);
        }
        debug!("query_channels returned {} channels", out.len());
        Ok(out)
    }

    pub async fn query_users(&self, options: QueryUsersOptions) -> ChatResult<Vec<User>> {
        let body = self.inner.request(users::query_users(&options)?).await?;
        let UsersResponse { users } = decode(body)?;
        {
            let mut state = self.inner.dispatcher.write_state();
            for user in &users {
                state.update_user(user);
            }
        }
        Ok(users)
    }

    pub async fn search(&self, options: SearchOptions) -> ChatResult<SearchResponse> {
        let body = self.inner.request(search::search(&options)?).await?;
        decode(body)
    }
}

fn already_connected() -> ChatError {
    ChatError::Config("a user is already connected, call disconnect() first".into())
}

impl ClientInner {
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Option<Session> {
        self.lock_session().clone()
    }

    /// Validate the identity and claim the session slot. Synchronous: the
    /// slot is taken before the caller awaits anything.
    fn open_session(
        self: &Arc<Self>,
        config: &ClientConfig,
        user: User,
        token: String,
        auth_type: AuthType,
    ) -> ChatResult<StableConnection> {
        let mut slot = self.lock_session();
        if slot.is_some() {
            return Err(already_connected());
        }
        if user.id.trim().is_empty() {
            return Err(ChatError::MissingConfig("user.id".into()));
        }
        let token = match auth_type {
            AuthType::Anonymous => token,
            AuthType::Jwt => resolve_token(config, &user, token)?,
        };

        let params = ConnectParams {
            ws_base_url: config.ws_url(),
            api_key: config.api.api_key.clone(),
            user: user.clone(),
            client_id: format!("{}--{}", user.id, Uuid::new_v4()),
            token: token.clone(),
            auth_type,
            max_query_len: config.connection.max_handshake_query_len,
        };
        let handler = Arc::new(SessionHandler {
            client: Arc::downgrade(self),
        });
        let connection = StableConnection::new(
            params,
            ReconnectConfig::from(&config.connection),
            HealthCheckConfig::from(&config.connection),
            Arc::clone(&self.transport),
            handler,
        )?;

        self.dispatcher.write_state().set_me(&user);
        *slot = Some(Session {
            user_id: user.id,
            token,
            auth_type,
            connection: connection.clone(),
        });
        Ok(connection)
    }

    /// Tear the session down. With `only_client`, only if it is still that
    /// session.
    async fn close_session(&self, only_client: Option<&str>) {
        let session = {
            let mut slot = self.lock_session();
            let replaced = matches!(
                (&*slot, only_client),
                (Some(s), Some(client_id)) if s.connection.client_id() != client_id
            );
            if replaced {
                None
            } else {
                slot.take()
            }
        };
        let Some(session) = session else {
            return;
        };
        self.stop_clean_task();
        session.connection.disconnect().await;
        self.dispatcher.reset();
        info!("session for {} closed", session.user_id);
    }

    fn channel_for(self: &Arc<Self>, cid: Cid, data: Option<Map<String, Value>>) -> Channel {
        let key = cid.to_string();
        let client = Arc::downgrade(self);
        self.dispatcher
            .channel_or_insert_with(&key, || Channel::new(cid, data, client))
    }

    async fn fold_snapshot(self: &Arc<Self>, snapshot: &ChannelSnapshot) -> ChatResult<Channel> {
        let info = &snapshot.channel;
        let cid = if info.cid.is_empty() {
            Cid::new(info.channel_type.as_str(), info.id.as_str())?
        } else {
            info.cid.parse()?
        };
        let channel = self.channel_for(cid, None);
        self.dispatcher.merge_snapshot(&channel, snapshot).await;
        Ok(channel)
    }

    /// Send a request once the connection is ready.
    pub(crate) async fn request(&self, request: ApiRequest) -> ChatResult<Value> {
        let connection_id = match self.session() {
            Some(session) => Some(session.connection.wait_ready().await?.connection_id.clone()),
            None => None,
        };
        self.send(request, connection_id).await
    }

    /// Send a request right away, on behalf of the session if there is one,
    /// else as the server identity when a secret is configured.
    async fn send(&self, request: ApiRequest, connection_id: Option<String>) -> ChatResult<Value> {
        let (base_url, api_key, secret) = {
            let config = self.config.read().await;
            (
                config.api.base_url.clone(),
                config.api.api_key.clone(),
                config.api.api_secret.clone(),
            )
        };
        let auth = match self.session() {
            Some(session) => Some(RequestAuth {
                token: session.token,
                auth_type: session.auth_type,
                connection_id,
            }),
            None => match secret.filter(|s| !s.is_empty()) {
                Some(secret) => Some(RequestAuth {
                    token: token::server_token(&secret)?,
                    auth_type: AuthType::Jwt,
                    connection_id: None,
                }),
                None => None,
            },
        };
        debug!("{} {}", request.method, request.path);
        self.requester
            .send(request.with_context(base_url, api_key, auth))
            .await
    }

    /// Re-query every watched channel and fold the results in, then tell
    /// listeners the caches are current again.
    async fn recover(&self, open: &ConnectionOpen) -> ChatResult<()> {
        let state_config = self.config.read().await.state.clone();
        if state_config.recover_state_on_reconnect {
            let mut watched = Vec::new();
            for channel in self.dispatcher.channels() {
                if !channel.is_watching() {
                    continue;
                }
                let (last_at, last_id) = channel
                    .read_state(|s| (s.last_message_at(), s.last_message().map(|m| m.id.clone())))
                    .await;
                watched.push((channel, last_at, last_id));
            }
            watched.sort_by(|a, b| b.1.cmp(&a.1));
            info!("recovering {} watched channels", watched.len());

            for chunk in watched.chunks(state_config.recovery_channel_limit.max(1)) {
                let cids: Vec<String> = chunk.iter().map(|(c, _, _)| c.cid().to_string()).collect();
                let mut options = QueryChannelsOptions::new(json!({ "cid": { "$in": cids } }));
                options.sort = vec![SortParam::desc("last_message_at")];
                options.presence = true;
                options.limit = Some(chunk.len() as u32);
                options.last_message_ids = chunk
                    .iter()
                    .filter_map(|(c, _, id)| id.clone().map(|id| (c.cid().to_string(), id)))
                    .collect();

                let body = self
                    .send(
                        channels::query_channels(&options)?,
                        Some(open.connection_id.clone()),
                    )
                    .await?;
                let response: QueryChannelsResponse = decode(body)?;
                for snapshot in &response.channels {
                    let info = &snapshot.channel;
                    let cid = if info.cid.is_empty() {
                        format!("{}:{}", info.channel_type, info.id)
                    } else {
                        info.cid.clone()
                    };
                    match self.dispatcher.channel(&cid) {
                        Some(channel) => self.dispatcher.merge_snapshot(&channel, snapshot).await,
                        None => debug!("recovery returned unknown channel {cid}"),
                    }
                }
            }
        }
        self.dispatcher.dispatch(Event::connection_recovered()).await;
        Ok(())
    }

    fn start_clean_task(self: &Arc<Self>, config: &StateConfig) {
        let client = Arc::downgrade(self);
        let interval = Duration::from_millis(config.clean_interval_ms.max(1));
        let typing_timeout = chrono::Duration::from_std(Duration::from_millis(
            config.typing_timeout_ms,
        ))
        .unwrap_or_else(|_| chrono::Duration::days(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    break;
                };
                client.dispatcher.clean(Utc::now(), typing_timeout).await;
            }
        });

        let previous = self
            .clean_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_clean_task(&self) {
        let handle = self
            .clean_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.stop_clean_task();
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { session.connection.disconnect().await });
            }
        }
    }
}

/// Pick the token the session connects with.
///
/// With an API secret and no token, one is signed for the user. Without a
/// secret the token must name the same user.
fn resolve_token(config: &ClientConfig, user: &User, token: String) -> ChatResult<String> {
    let secret = config.api.api_secret.as_deref().filter(|s| !s.is_empty());
    match (secret, token.is_empty()) {
        (Some(secret), true) => token::create_user_token(secret, &user.id, None, None),
        (Some(_), false) => Ok(token),
        (None, true) => Err(ChatError::MissingConfig("user token".into())),
        (None, false) => match token::user_id_from_token(&token) {
            Some(id) if id == user.id => Ok(token),
            Some(id) => Err(ChatError::Config(format!(
                "token was issued for user '{id}', not '{}'",
                user.id
            ))),
            None => Err(ChatError::Config("user token is not a valid JWT".into())),
        },
    }
}

/// Connection callbacks, holding the client weakly so the connection task
/// never keeps a dropped client alive.
struct SessionHandler {
    client: Weak<ClientInner>,
}

#[async_trait]
impl ConnectionHandler for SessionHandler {
    async fn on_event(&self, event: Event) {
        if let Some(client) = self.client.upgrade() {
            client.dispatcher.dispatch(event).await;
        }
    }

    async fn recover(&self, open: &ConnectionOpen) -> ChatResult<()> {
        match self.client.upgrade() {
            Some(client) => client.recover(open).await,
            None => Ok(()),
        }
    }
}
