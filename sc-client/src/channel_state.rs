//! Local mirror of one channel.
//!
//! The cache is fed from two directions: query snapshots (messages merged
//! as a union, the rest replaced, so a repeated snapshot changes nothing)
//! and socket events applied one at a time. Messages stay sorted by
//! `created_at` with unique ids; live locations honour stop markers so late
//! updates cannot bring a stopped share back.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sc_models::{
    ChannelInfo, ChannelSnapshot, Cid, Event, EventType, LiveLocation, Member, Message,
    ReadState, User,
};
use tracing::debug;

/// Someone currently typing.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingEntry {
    pub user: User,
    /// Local receive time of the last `typing.start`.
    pub started_at: DateTime<Utc>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    cid: Cid,
    data: Option<ChannelInfo>,
    messages: Vec<Message>,
    members: HashMap<String, Member>,
    read: HashMap<String, ReadState>,
    watchers: HashMap<String, User>,
    watcher_count: u64,
    typing: HashMap<String, TypingEntry>,
    live_locations: HashMap<String, LiveLocation>,
    location_stops: HashMap<String, DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl ChannelState {
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            data: None,
            messages: Vec::new(),
            members: HashMap::new(),
            read: HashMap::new(),
            watchers: HashMap::new(),
            watcher_count: 0,
            typing: HashMap::new(),
            live_locations: HashMap::new(),
            location_stops: HashMap::new(),
            last_synced_at: None,
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> Option<&ChannelInfo> {
        self.data.as_ref()
    }

    /// Main-list messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn members(&self) -> &HashMap<String, Member> {
        &self.members
    }

    pub fn read(&self) -> &HashMap<String, ReadState> {
        &self.read
    }

    pub fn watchers(&self) -> &HashMap<String, User> {
        &self.watchers
    }

    pub fn watcher_count(&self) -> u64 {
        self.watcher_count
    }

    pub fn typing(&self) -> &HashMap<String, TypingEntry> {
        &self.typing
    }

    pub fn live_locations(&self) -> &HashMap<String, LiveLocation> {
        &self.live_locations
    }

    pub fn live_location(&self, user_id: &str) -> Option<&LiveLocation> {
        self.live_locations.get(user_id)
    }

    /// Creation time of the newest message merged from a snapshot.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Time of the latest activity, used to order channels for recovery.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        let from_data = self.data.as_ref().and_then(|d| d.last_message_at);
        let from_list = self.messages.last().map(|m| m.created_at);
        from_data.max(from_list)
    }

    /// Messages by other users after `user_id` last read the channel.
    pub fn unread_count(&self, user_id: &str) -> usize {
        let last_read = self.read.get(user_id).map(|r| r.last_read);
        self.messages
            .iter()
            .filter(|m| m.user_id() != Some(user_id) && !m.silent && !m.is_deleted())
            .filter(|m| last_read.map_or(true, |at| m.created_at > at))
            .count()
    }

    /// Fold a server snapshot into the cache.
    ///
    /// Messages are unioned, since snapshots are paged and a newer local
    /// revision must survive. Members, read markers and live locations are
    /// replaced by the snapshot; watchers too whenever the snapshot carries
    /// presence. Stop markers are kept, so a replayed share stays stopped.
    pub fn merge_snapshot(&mut self, snapshot: &ChannelSnapshot) {
        self.data = Some(snapshot.channel.clone());
        for message in &snapshot.messages {
            self.upsert_message(message);
            self.last_synced_at = self.last_synced_at.max(Some(message.created_at));
        }
        self.members = snapshot
            .members
            .iter()
            .filter_map(|m| m.member_user_id().map(|id| (id.to_string(), m.clone())))
            .collect();
        self.read = snapshot
            .read
            .iter()
            .map(|r| (r.user.id.clone(), r.clone()))
            .collect();
        if snapshot.watcher_count.is_some() || !snapshot.watchers.is_empty() {
            self.watchers = snapshot
                .watchers
                .iter()
                .map(|w| (w.id.clone(), w.clone()))
                .collect();
            self.watcher_count = snapshot
                .watcher_count
                .unwrap_or(self.watchers.len() as u64);
        }
        self.live_locations.clear();
        for location in &snapshot.active_live_locations {
            let at = location.effective_at();
            self.start_location(location, at);
        }
    }

    /// Insert or replace a message, keeping the list sorted and unique.
    ///
    /// Thread-only replies are skipped. An existing copy is only replaced by
    /// one that is at least as new. Returns whether the list changed.
    pub fn upsert_message(&mut self, message: &Message) -> bool {
        if message.is_thread_only() {
            return false;
        }
        if let Some(pos) = self.messages.iter().position(|m| m.id == message.id) {
            let current = &self.messages[pos];
            if revision(message) < revision(current) || current == message {
                return false;
            }
            if current.created_at == message.created_at {
                self.messages[pos] = message.clone();
                return true;
            }
            self.messages.remove(pos);
        }
        let idx = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(idx, message.clone());
        true
    }

    /// Add a new message; a live location share it carries starts too.
    pub fn add_message(&mut self, message: &Message, at: DateTime<Utc>) {
        self.upsert_message(message);
        if let Some(location) = live_share(message) {
            self.start_location(&location, Some(at));
        }
    }

    fn remove_message(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        before != self.messages.len()
    }

    /// Apply one event addressed to this channel.
    pub fn apply_event(&mut self, event: &Event) {
        let at = event.timestamp().unwrap_or_else(Utc::now);
        match &event.kind {
            EventType::MessageNew | EventType::NotificationMessageNew => {
                if let Some(message) = &event.message {
                    self.add_message(message, at);
                    if let Some(user_id) = message.user_id() {
                        self.typing.remove(user_id);
                    }
                }
            }
            EventType::MessageUpdated => {
                if let Some(message) = &event.message {
                    if self.message(&message.id).is_some() {
                        self.upsert_message(message);
                    }
                }
            }
            EventType::MessageDeleted => {
                if let Some(message) = &event.message {
                    if event.hard_delete.unwrap_or(false) {
                        self.remove_message(&message.id);
                    } else if self.message(&message.id).is_some() {
                        self.upsert_message(message);
                    }
                }
            }
            EventType::MessageRead | EventType::NotificationMarkRead => {
                if let Some(user) = &event.user {
                    let last_read_message_id = event
                        .extra
                        .get("last_read_message_id")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    self.read.insert(
                        user.id.clone(),
                        ReadState {
                            user: user.clone(),
                            last_read: at,
                            unread_messages: 0,
                            last_read_message_id,
                        },
                    );
                }
            }
            EventType::TypingStart => {
                if let Some(user) = &event.user {
                    self.typing.insert(
                        user.id.clone(),
                        TypingEntry {
                            user: user.clone(),
                            started_at: event.received_at.unwrap_or_else(Utc::now),
                            parent_id: event
                                .extra
                                .get("parent_id")
                                .and_then(|v| v.as_str())
                                .map(String::from),
                        },
                    );
                }
            }
            EventType::TypingStop => {
                if let Some(user_id) = event.user_id() {
                    self.typing.remove(user_id);
                }
            }
            EventType::UserWatchingStart => {
                if let Some(user) = &event.user {
                    self.watchers.insert(user.id.clone(), user.clone());
                }
                self.watcher_count = event
                    .watcher_count
                    .unwrap_or(self.watcher_count.saturating_add(1));
            }
            EventType::UserWatchingStop => {
                if let Some(user_id) = event.user_id() {
                    self.watchers.remove(user_id);
                }
                self.watcher_count = event
                    .watcher_count
                    .unwrap_or(self.watcher_count.saturating_sub(1));
            }
            EventType::MemberAdded | EventType::MemberUpdated => {
                if let Some(member) = &event.member {
                    if let Some(id) = member.member_user_id() {
                        self.members.insert(id.to_string(), member.clone());
                    }
                }
            }
            EventType::MemberRemoved => {
                let id = event
                    .member
                    .as_ref()
                    .and_then(|m| m.member_user_id())
                    .or_else(|| event.user_id());
                if let Some(id) = id {
                    self.members.remove(id);
                }
            }
            EventType::ChannelUpdated => {
                if let Some(channel) = &event.channel {
                    self.data = Some(channel.clone());
                }
            }
            EventType::ChannelTruncated => {
                self.messages.clear();
                if let Some(channel) = &event.channel {
                    self.data = Some(channel.clone());
                }
            }
            EventType::LiveLocationStarted => {
                if let Some(location) = &event.live_location {
                    self.start_location(location, Some(at));
                }
            }
            EventType::LiveLocationUpdated => {
                if let Some(location) = &event.live_location {
                    self.update_location(location);
                }
            }
            EventType::LiveLocationStopped => {
                let user_id = event
                    .live_location
                    .as_ref()
                    .map(|l| l.user_id.as_str())
                    .or_else(|| {
                        event
                            .extra
                            .get("live_location")
                            .and_then(|l| l.get("user_id"))
                            .and_then(|v| v.as_str())
                    })
                    .or_else(|| event.user_id());
                if let Some(user_id) = user_id {
                    self.stop_location(user_id, at);
                }
            }
            _ => {}
        }
    }

    /// Begin (or restart) a user's live location.
    ///
    /// Ignored when the user was stopped at or after `at`; a start without a
    /// timestamp never overrides a stop.
    pub fn start_location(&mut self, location: &LiveLocation, at: Option<DateTime<Utc>>) {
        if location.user_id.is_empty() {
            return;
        }
        if let Some(stopped) = self.location_stops.get(&location.user_id) {
            if at.map_or(true, |at| at <= *stopped) {
                debug!(
                    "ignoring live location start for {} in {}: stopped at {}",
                    location.user_id, self.cid, stopped
                );
                return;
            }
        }
        self.location_stops.remove(&location.user_id);
        self.live_locations
            .insert(location.user_id.clone(), location.clone());
    }

    /// Refresh an active live location in place. Unknown users are ignored.
    pub fn update_location(&mut self, location: &LiveLocation) -> bool {
        let Some(current) = self.live_locations.get_mut(&location.user_id) else {
            return false;
        };
        current.latitude = location.latitude;
        current.longitude = location.longitude;
        if location.end_at.is_some() {
            current.end_at = location.end_at;
        }
        if location.updated_at.is_some() {
            current.updated_at = location.updated_at;
        }
        if location.created_by_device_id.is_some() {
            current.created_by_device_id = location.created_by_device_id.clone();
        }
        true
    }

    /// Remove a user's live location and remember when it stopped.
    pub fn stop_location(&mut self, user_id: &str, at: DateTime<Utc>) {
        self.live_locations.remove(user_id);
        let stop = self.location_stops.entry(user_id.to_string()).or_insert(at);
        *stop = (*stop).max(at);
    }

    /// Refresh every copy of `user` held by this channel.
    pub fn update_user(&mut self, user: &User) {
        for message in &mut self.messages {
            if let Some(author) = message.user.as_mut().filter(|u| u.id == user.id) {
                author.merge_from(user);
            }
        }
        if let Some(member_user) = self
            .members
            .get_mut(&user.id)
            .and_then(|m| m.user.as_mut())
        {
            member_user.merge_from(user);
        }
        if let Some(watcher) = self.watchers.get_mut(&user.id) {
            watcher.merge_from(user);
        }
        if let Some(read) = self.read.get_mut(&user.id) {
            read.user.merge_from(user);
        }
        if let Some(typing) = self.typing.get_mut(&user.id) {
            typing.user.merge_from(user);
        }
    }

    /// Ids of every user this channel mentions.
    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .messages
            .iter()
            .filter_map(|m| m.user_id().map(String::from))
            .chain(self.members.keys().cloned())
            .chain(self.watchers.keys().cloned())
            .chain(self.read.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Drop typing indicators older than `typing_timeout` and live locations
    /// past their end. Returns a synthetic `typing.stop` for each expired
    /// typist.
    pub fn clean(&mut self, now: DateTime<Utc>, typing_timeout: Duration) -> Vec<Event> {
        let stale: Vec<String> = self
            .typing
            .iter()
            .filter(|(_, entry)| now - entry.started_at > typing_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let mut events = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(entry) = self.typing.remove(&id) {
                let mut event = Event::new(EventType::TypingStop);
                event.cid = Some(self.cid.to_string());
                event.channel_type = Some(self.cid.channel_type().to_string());
                event.channel_id = Some(self.cid.id().to_string());
                event.user = Some(entry.user);
                events.push(event);
            }
        }

        let expired: Vec<(String, DateTime<Utc>)> = self
            .live_locations
            .values()
            .filter(|l| l.is_expired(now))
            .map(|l| (l.user_id.clone(), l.end_at.unwrap_or(now)))
            .collect();
        for (user_id, end_at) in expired {
            self.stop_location(&user_id, end_at);
        }

        events
    }
}

fn revision(message: &Message) -> DateTime<Utc> {
    message.updated_at.unwrap_or(message.created_at)
}

/// A message that carries a live (time-bounded) location share.
fn live_share(message: &Message) -> Option<LiveLocation> {
    let shared = message.shared_location.as_ref()?;
    shared.end_at?;
    let mut location = shared.clone();
    if location.user_id.is_empty() {
        location.user_id = message.user_id()?.to_string();
    }
    if location.message_id.is_none() {
        location.message_id = Some(message.id.clone());
    }
    Some(location)
}
