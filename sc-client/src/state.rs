//! Process-wide client state: the user cache.

use std::collections::{HashMap, HashSet};

use sc_models::User;

/// Users seen by this session and the channels they appear in.
///
/// Owned by one client; two clients in the same process never share it.
#[derive(Debug, Default, Clone)]
pub struct ClientState {
    me: Option<User>,
    users: HashMap<String, User>,
    user_channels: HashMap<String, HashSet<String>>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's own user, as last reported by the server.
    pub fn me(&self) -> Option<&User> {
        self.me.as_ref()
    }

    pub fn set_me(&mut self, me: &User) {
        match &mut self.me {
            Some(current) if current.id == me.id => current.merge_from(me),
            _ => self.me = Some(me.clone()),
        }
        self.update_user(me);
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Merge a newer record for a user into the cache.
    pub fn update_user(&mut self, user: &User) {
        self.users
            .entry(user.id.clone())
            .and_modify(|u| u.merge_from(user))
            .or_insert_with(|| user.clone());
    }

    /// Remember that `user_id` shows up in channel `cid`.
    pub fn add_channel_reference(&mut self, user_id: &str, cid: &str) {
        self.user_channels
            .entry(user_id.to_string())
            .or_default()
            .insert(cid.to_string());
    }

    /// Channels in which the user has been seen.
    pub fn channels_of(&self, user_id: &str) -> Vec<String> {
        let mut cids: Vec<String> = self
            .user_channels
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        cids.sort();
        cids
    }

    /// Forget a channel, e.g. after it was deleted.
    pub fn remove_channel(&mut self, cid: &str) {
        for cids in self.user_channels.values_mut() {
            cids.remove(cid);
        }
        self.user_channels.retain(|_, cids| !cids.is_empty());
    }

    /// Drop everything; used when the session ends.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
