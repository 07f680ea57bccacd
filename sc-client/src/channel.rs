//! Channel handle.
//!
//! A [`Channel`] is what `ChatClient::channel` hands out: a cheap clone of
//! one cached channel. Calls made through it go over the session's HTTP
//! helper and their responses are folded back into the channel cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sc_api::endpoints::channels::{self, ChannelQuery, MessagePayload};
use sc_api::endpoints::locations::{self, LocationUpdate};
use sc_api::response::{EventResponse, LiveLocationResponse, MessageResponse};
use sc_api::{decode, ApiRequest};
use sc_core::error::{ChatError, ChatResult};
use sc_models::{validate_coordinates, ChannelSnapshot, Cid, Event, LiveLocation, Message};
use serde_json::{json, Map, Value};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::channel_state::ChannelState;
use crate::client::ClientInner;
use crate::listeners::{Listener, ListenerScope, Listeners};

/// Minimum gap between two `typing.start` events sent by this client.
const KEYSTROKE_THROTTLE: Duration = Duration::from_secs(2);

/// Handle to one channel of the session.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    cid: Cid,
    data: Option<Map<String, Value>>,
    state: RwLock<ChannelState>,
    listeners: Listeners,
    client: Weak<ClientInner>,
    watching: AtomicBool,
    last_keystroke: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("cid", &self.inner.cid)
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        cid: Cid,
        data: Option<Map<String, Value>>,
        client: Weak<ClientInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                state: RwLock::new(ChannelState::new(cid.clone())),
                cid,
                data,
                listeners: Listeners::new(),
                client,
                watching: AtomicBool::new(false),
                last_keystroke: Mutex::new(None),
            }),
        }
    }

    /// A channel not attached to any client; API calls fail with
    /// `Disconnected`.
    #[cfg(test)]
    pub(crate) fn detached(cid: Cid) -> Self {
        Self::new(cid, None, Weak::new())
    }

    pub fn cid(&self) -> &Cid {
        &self.inner.cid
    }

    pub fn channel_type(&self) -> &str {
        self.inner.cid.channel_type()
    }

    pub fn id(&self) -> &str {
        self.inner.cid.id()
    }

    /// Custom data the channel was created with.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.inner.data.as_ref()
    }

    /// Whether the session watches this channel; watched channels are
    /// re-synchronized after a reconnect.
    pub fn is_watching(&self) -> bool {
        self.inner.watching.load(Ordering::SeqCst)
    }

    pub(crate) fn set_watching(&self, watching: bool) {
        self.inner.watching.store(watching, Ordering::SeqCst);
    }

    /// Copy of the cached state.
    pub async fn state(&self) -> ChannelState {
        self.inner.state.read().await.clone()
    }

    /// Read the cached state without copying it.
    pub async fn read_state<R>(&self, f: impl FnOnce(&ChannelState) -> R) -> R {
        f(&*self.inner.state.read().await)
    }

    pub(crate) async fn write_state(&self) -> RwLockWriteGuard<'_, ChannelState> {
        self.inner.state.write().await
    }

    pub(crate) async fn apply_event(&self, event: &Event) {
        self.inner.state.write().await.apply_event(event);
    }

    /// Listeners scoped to this channel.
    pub fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }

    pub fn on(
        &self,
        scope: impl Into<ListenerScope>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Listener {
        self.inner.listeners.on(scope, callback)
    }

    pub fn off(&self, scope: impl Into<ListenerScope>, listener: &Listener) -> bool {
        self.inner.listeners.off(scope, listener)
    }

    fn client(&self) -> ChatResult<Arc<ClientInner>> {
        self.inner.client.upgrade().ok_or(ChatError::Disconnected)
    }

    async fn call(&self, request: ApiRequest) -> ChatResult<(Arc<ClientInner>, Value)> {
        let client = self.client()?;
        let body = client.request(request).await?;
        Ok((client, body))
    }

    /// Load the channel (creating it server-side if needed) and start
    /// watching it.
    pub async fn watch(&self) -> ChatResult<ChannelSnapshot> {
        self.query(ChannelQuery {
            presence: true,
            data: self.inner.data.clone(),
            ..Default::default()
        })
        .await
    }

    /// Query the channel and merge the returned state into the cache.
    pub async fn query(&self, query: ChannelQuery) -> ChatResult<ChannelSnapshot> {
        let request = channels::query(&self.inner.cid, &query)?;
        let (client, body) = self.call(request).await?;
        let snapshot: ChannelSnapshot = decode(body)?;
        client.dispatcher.merge_snapshot(self, &snapshot).await;
        if query.watch {
            self.set_watching(true);
        }
        debug!(
            "queried {}: {} messages, {} members",
            self.inner.cid,
            snapshot.messages.len(),
            snapshot.members.len()
        );
        Ok(snapshot)
    }

    pub async fn stop_watching(&self) -> ChatResult<()> {
        self.call(channels::stop_watching(&self.inner.cid)).await?;
        self.set_watching(false);
        Ok(())
    }

    /// Send a message; the stored message is added to the cache.
    ///
    /// A `shared_location` in the payload is checked locally first.
    pub async fn send_message(&self, payload: MessagePayload) -> ChatResult<Message> {
        if let Some(shared) = &payload.shared_location {
            check_shared_location(shared)?;
        }
        let request = channels::send_message(&self.inner.cid, &payload)?;
        let (client, body) = self.call(request).await?;
        let MessageResponse { mut message } = decode(body)?;
        if message.user.is_none() {
            message.user = client.dispatcher.me();
        }
        let at = message.created_at;
        client
            .dispatcher
            .update_channel(self, |state| state.add_message(&message, at))
            .await;
        Ok(message)
    }

    /// Mark the channel read, up to `message_id` or entirely.
    pub async fn mark_read(&self, message_id: Option<&str>) -> ChatResult<Option<Event>> {
        let (client, body) = self
            .call(channels::mark_read(&self.inner.cid, message_id))
            .await?;
        let EventResponse { event } = decode(body)?;
        if let Some(event) = &event {
            client
                .dispatcher
                .update_channel(self, |state| state.apply_event(event))
                .await;
        }
        Ok(event)
    }

    /// Send a custom event to everyone watching the channel.
    pub async fn send_event(&self, event: Value) -> ChatResult<Option<Event>> {
        let (_, body) = self
            .call(channels::send_event(&self.inner.cid, event))
            .await?;
        let EventResponse { event } = decode(body)?;
        Ok(event)
    }

    /// Signal that the user is typing. At most one `typing.start` goes out
    /// per throttle window.
    pub async fn keystroke(&self) -> ChatResult<()> {
        let now = Instant::now();
        let due = {
            let mut last = self
                .inner
                .last_keystroke
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match *last {
                Some(at) if now.duration_since(at) < KEYSTROKE_THROTTLE => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };
        if due {
            self.send_event(json!({ "type": "typing.start" })).await?;
        }
        Ok(())
    }

    /// Send `typing.stop` if a `typing.start` went out.
    pub async fn stop_typing(&self) -> ChatResult<()> {
        let was_typing = self
            .inner
            .last_keystroke
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if was_typing {
            self.send_event(json!({ "type": "typing.stop" })).await?;
        }
        Ok(())
    }

    /// Start sharing a live location until `end_at`.
    pub async fn start_live_location(
        &self,
        latitude: f64,
        longitude: f64,
        end_at: DateTime<Utc>,
        device_id: Option<String>,
    ) -> ChatResult<Message> {
        validate_coordinates(latitude, longitude)?;
        let mut shared = json!({
            "latitude": latitude,
            "longitude": longitude,
            "end_at": end_at,
        });
        if let Some(device_id) = device_id {
            shared["created_by_device_id"] = Value::String(device_id);
        }
        let payload = MessagePayload {
            shared_location: Some(shared),
            ..Default::default()
        };
        let message = self.send_message(payload).await?;
        info!("started live location in {}", self.inner.cid);
        Ok(message)
    }

    /// Move an active share. Rejected locally when the coordinates are off
    /// the globe; the cache is only touched after the server accepts.
    pub async fn update_live_location(
        &self,
        message_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> ChatResult<LiveLocation> {
        validate_coordinates(latitude, longitude)?;
        let request = locations::update_live_location(&LocationUpdate {
            message_id: message_id.to_string(),
            latitude: Some(latitude),
            longitude: Some(longitude),
            end_at: None,
            created_by_device_id: None,
        })?;
        let (client, body) = self.call(request).await?;
        let mut location: LiveLocationResponse = decode(body)?;
        if location.user_id.is_empty() {
            location.user_id = own_user_id(&client)?;
        }
        client
            .dispatcher
            .update_channel(self, |state| state.update_location(&location))
            .await;
        Ok(location)
    }

    /// End a share now. The user's entry leaves the cache and later
    /// updates for it are ignored.
    pub async fn stop_live_location(&self, message_id: &str) -> ChatResult<()> {
        let now = Utc::now();
        let request = locations::stop_live_location(message_id, now)?;
        let (client, body) = self.call(request).await?;
        let user_id = match body.get("user_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => own_user_id(&client)?,
        };
        // Stop markers are compared with server event times.
        let stopped_at = server_time(&body, "updated_at")
            .or_else(|| server_time(&body, "end_at"))
            .unwrap_or(now);
        client
            .dispatcher
            .update_channel(self, |state| state.stop_location(&user_id, stopped_at))
            .await;
        info!("stopped live location in {}", self.inner.cid);
        Ok(())
    }
}

fn server_time(body: &Value, key: &str) -> Option<DateTime<Utc>> {
    body.get(key)?.as_str()?.parse().ok()
}

fn own_user_id(client: &ClientInner) -> ChatResult<String> {
    client
        .dispatcher
        .me()
        .map(|me| me.id)
        .ok_or_else(|| ChatError::Config("no user is connected".into()))
}

/// Check the coordinates of an outgoing `shared_location`.
fn check_shared_location(shared: &Value) -> ChatResult<()> {
    let coordinate = |key: &str| -> ChatResult<f64> {
        shared
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| ChatError::InvalidInput(format!("shared_location.{key} must be a number")))
    };
    validate_coordinates(coordinate("latitude")?, coordinate("longitude")?)
}
