//! Event dispatch.
//!
//! Every event, whatever produced it (the connection task, the clean
//! ticker, or the application), goes through [`EventDispatcher::dispatch`]
//! one at a time. For each event the client-wide caches are updated first,
//! then the addressed channel's cache and listeners, then the client
//! listeners, and finally broadcast subscribers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use sc_core::constants::EVENT_CHANNEL_CAPACITY;
use sc_models::{ChannelSnapshot, Event, EventType, User};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

use crate::channel::Channel;
use crate::channel_state::ChannelState;
use crate::listeners::Listeners;
use crate::state::ClientState;

/// Routes events into the caches and out to listeners.
pub struct EventDispatcher {
    state: RwLock<ClientState>,
    channels: RwLock<HashMap<String, Channel>>,
    listeners: Listeners,
    sender: broadcast::Sender<Event>,
    lock: Mutex<()>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(ClientState::new()),
            channels: RwLock::new(HashMap::new()),
            listeners: Listeners::new(),
            sender,
            lock: Mutex::new(()),
        }
    }

    /// Client-wide listeners.
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Receive every dispatched event asynchronously.
    ///
    /// Slow receivers lose the oldest events (`RecvError::Lagged`); the
    /// caches and listeners are unaffected.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Copy of the user cache.
    pub fn client_state(&self) -> ClientState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user(id)
            .cloned()
    }

    pub fn me(&self) -> Option<User> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .me()
            .cloned()
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, ClientState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channel(&self, cid: &str) -> Option<Channel> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cid)
            .cloned()
    }

    /// Every cached channel, ordered by cid.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.cid().cmp(b.cid()));
        channels
    }

    /// Return the cached channel for `cid`, creating it with `make` if absent.
    pub(crate) fn channel_or_insert_with(
        &self,
        cid: &str,
        make: impl FnOnce() -> Channel,
    ) -> Channel {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cid.to_string())
            .or_insert_with(make)
            .clone()
    }

    fn remove_channel(&self, cid: &str) {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(cid);
        if removed.is_some() {
            debug!("dropped channel cache {cid}");
            self.write_state().remove_channel(cid);
        }
    }

    /// Drop every channel and the user cache. Listeners stay registered.
    pub(crate) fn reset(&self) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.write_state().clear();
    }

    /// Deliver one event. Returns once caches and listeners have seen it.
    pub async fn dispatch(&self, event: Event) {
        let _serial = self.lock.lock().await;
        trace!("dispatching {}", event.kind);

        self.apply_client_effects(&event).await;

        if let Some(cid) = event.channel_cid() {
            if let Some(channel) = self.channel(&cid) {
                channel.apply_event(&event).await;
                channel.listeners().emit(&event);
            }
            if matches!(
                event.kind,
                EventType::ChannelDeleted | EventType::NotificationChannelDeleted
            ) {
                self.remove_channel(&cid);
            }
        }

        self.listeners.emit(&event);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    async fn apply_client_effects(&self, event: &Event) {
        if let Some(me) = &event.me {
            self.write_state().set_me(me);
        }

        let Some(user) = &event.user else {
            if let Some(author) = event.message.as_ref().and_then(|m| m.user.as_ref()) {
                self.track_user(author, event.channel_cid().as_deref());
            }
            return;
        };

        if event.kind.is_user_event() {
            let cids = {
                let mut state = self.write_state();
                state.update_user(user);
                state.channels_of(&user.id)
            };
            for cid in cids {
                if let Some(channel) = self.channel(&cid) {
                    channel.write_state().await.update_user(user);
                }
            }
        } else {
            self.track_user(user, event.channel_cid().as_deref());
        }
    }

    fn track_user(&self, user: &User, cid: Option<&str>) {
        let mut state = self.write_state();
        state.update_user(user);
        if let Some(cid) = cid {
            state.add_channel_reference(&user.id, cid);
        }
    }

    /// Fold a query snapshot into its channel, in order with events.
    pub(crate) async fn merge_snapshot(&self, channel: &Channel, snapshot: &ChannelSnapshot) {
        let _serial = self.lock.lock().await;
        channel.write_state().await.merge_snapshot(snapshot);

        let cid = channel.cid().to_string();
        let mut state = self.write_state();
        let users = snapshot
            .members
            .iter()
            .filter_map(|m| m.user.as_ref())
            .chain(snapshot.watchers.iter())
            .chain(snapshot.read.iter().map(|r| &r.user))
            .chain(snapshot.messages.iter().filter_map(|m| m.user.as_ref()));
        for user in users {
            state.update_user(user);
            state.add_channel_reference(&user.id, &cid);
        }
    }

    /// Apply a local change to one channel, in order with events.
    pub(crate) async fn update_channel<R>(
        &self,
        channel: &Channel,
        f: impl FnOnce(&mut ChannelState) -> R,
    ) -> R {
        let _serial = self.lock.lock().await;
        let mut state = channel.write_state().await;
        f(&mut state)
    }

    /// Expire typing indicators and live locations in every channel, then
    /// dispatch the resulting `typing.stop` events.
    pub async fn clean(&self, now: DateTime<Utc>, typing_timeout: chrono::Duration) {
        let mut expired = Vec::new();
        {
            let _serial = self.lock.lock().await;
            for channel in self.channels() {
                expired.extend(channel.write_state().await.clean(now, typing_timeout));
            }
        }
        for event in expired {
            self.dispatch(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::ListenerScope;
    use sc_models::{Cid, Message};
    use std::sync::{Arc, Mutex as StdMutex};

    fn channel(dispatcher: &EventDispatcher, cid: &str) -> Channel {
        let cid: Cid = cid.parse().unwrap();
        dispatcher.channel_or_insert_with(&cid.to_string(), || Channel::detached(cid.clone()))
    }

    fn message_event(cid: &str, id: &str, user: &str) -> Event {
        let mut event = Event::new(EventType::MessageNew);
        event.cid = Some(cid.into());
        let mut message = Message::new(id, "hi");
        message.user = Some(User::new(user));
        event.message = Some(message);
        event
    }

    #[tokio::test]
    async fn test_channel_listeners_run_before_client_listeners() {
        let dispatcher = EventDispatcher::new();
        let general = channel(&dispatcher, "messaging:general");
        let log = Arc::new(StdMutex::new(Vec::new()));

        let l = log.clone();
        dispatcher
            .listeners()
            .on(ListenerScope::All, move |e| l.lock().unwrap().push(format!("client:{}", e.kind)));
        let l = log.clone();
        general
            .listeners()
            .on("message.new", move |e| l.lock().unwrap().push(format!("channel:{}", e.kind)));

        dispatcher
            .dispatch(message_event("messaging:general", "m1", "bob"))
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["channel:message.new", "client:message.new"]
        );
        assert_eq!(general.state().await.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_events_for_unknown_channels_reach_client_listeners() {
        let dispatcher = EventDispatcher::new();
        let mut rx = dispatcher.subscribe();
        dispatcher
            .dispatch(message_event("messaging:elsewhere", "m1", "bob"))
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventType::MessageNew);
        assert!(dispatcher.channel("messaging:elsewhere").is_none());
    }

    #[tokio::test]
    async fn test_presence_updates_every_referencing_channel() {
        let dispatcher = EventDispatcher::new();
        let a = channel(&dispatcher, "messaging:a");
        let b = channel(&dispatcher, "messaging:b");
        dispatcher.dispatch(message_event("messaging:a", "m1", "bob")).await;
        dispatcher.dispatch(message_event("messaging:b", "m2", "bob")).await;

        let mut presence = Event::new(EventType::UserPresenceChanged);
        let mut bob = User::new("bob");
        bob.online = Some(true);
        presence.user = Some(bob);
        dispatcher.dispatch(presence).await;

        for ch in [a, b] {
            let state = ch.state().await;
            assert!(state.messages()[0].user.as_ref().unwrap().is_online());
        }
        assert!(dispatcher.user("bob").unwrap().is_online());
    }

    #[tokio::test]
    async fn test_me_is_refreshed_from_health_events() {
        let dispatcher = EventDispatcher::new();
        let mut check = Event::new(EventType::HealthCheck);
        check.me = Some(User::new("alice").with_name("Alice"));
        dispatcher.dispatch(check).await;
        assert_eq!(dispatcher.me().unwrap().name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_channel_deleted_drops_cache() {
        let dispatcher = EventDispatcher::new();
        let doomed = channel(&dispatcher, "messaging:doomed");
        let seen = Arc::new(StdMutex::new(0));
        let s = seen.clone();
        doomed
            .listeners()
            .on("channel.deleted", move |_| *s.lock().unwrap() += 1);

        let mut deleted = Event::new(EventType::ChannelDeleted);
        deleted.cid = Some("messaging:doomed".into());
        dispatcher.dispatch(deleted).await;

        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(dispatcher.channel("messaging:doomed").is_none());
    }

    #[tokio::test]
    async fn test_clean_dispatches_typing_stop() {
        let dispatcher = EventDispatcher::new();
        let general = channel(&dispatcher, "messaging:general");
        let stops = Arc::new(StdMutex::new(Vec::new()));
        let s = stops.clone();
        dispatcher.listeners().on("typing.stop", move |e| {
            s.lock().unwrap().push(e.user_id().unwrap_or_default().to_string())
        });

        let mut typing = Event::new(EventType::TypingStart);
        typing.cid = Some("messaging:general".into());
        typing.user = Some(User::new("bob"));
        let started = typing.received_at.unwrap();
        dispatcher.dispatch(typing).await;
        assert_eq!(general.state().await.typing().len(), 1);

        let timeout = chrono::Duration::seconds(7);
        dispatcher.clean(started + chrono::Duration::seconds(1), timeout).await;
        assert!(stops.lock().unwrap().is_empty());

        dispatcher.clean(started + chrono::Duration::seconds(8), timeout).await;
        assert_eq!(*stops.lock().unwrap(), vec!["bob"]);
        assert!(general.state().await.typing().is_empty());
    }
}
