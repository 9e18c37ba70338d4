//! Who is typing where.
//!
//! Entries expire on their own: a user counts as typing only while their
//! last `typing: true` is younger than the timeout. Expired entries are
//! dropped lazily on read and by [`TypingTracker::purge_stale`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use confab_shared::types::{ChatId, UserId};

#[derive(Clone)]
pub struct TypingTracker {
    entries: Arc<Mutex<HashMap<ChatId, HashMap<UserId, Instant>>>>,
    timeout: Duration,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a typing start (refreshing the deadline) or stop. Returns
    /// whether the user counted as typing before the call.
    pub async fn set_typing(&self, chat: ChatId, user: UserId, is_typing: bool) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let timeout = self.timeout;

        let previous = if is_typing {
            entries.entry(chat).or_default().insert(user, now)
        } else {
            let removed = entries.get_mut(&chat).and_then(|users| users.remove(&user));
            if entries.get(&chat).is_some_and(HashMap::is_empty) {
                entries.remove(&chat);
            }
            removed
        };
        previous.is_some_and(|at| now.duration_since(at) < timeout)
    }

    /// Users typing in `chat` right now.
    pub async fn currently_typing(&self, chat: ChatId) -> HashSet<UserId> {
        let mut entries = self.entries.lock().await;
        let Some(users) = entries.get_mut(&chat) else {
            return HashSet::new();
        };

        let now = Instant::now();
        users.retain(|_, at| now.duration_since(*at) < self.timeout);
        let typing: HashSet<UserId> = users.keys().copied().collect();
        if typing.is_empty() {
            entries.remove(&chat);
        }
        typing
    }

    /// Drop every entry for `user`. Returns the chats they were typing in.
    pub async fn clear_user(&self, user: UserId) -> Vec<ChatId> {
        let mut entries = self.entries.lock().await;
        let mut chats = Vec::new();
        entries.retain(|chat, users| {
            if users.remove(&user).is_some() {
                chats.push(*chat);
            }
            !users.is_empty()
        });
        chats
    }

    /// Remove expired entries everywhere. Returns how many were dropped.
    pub async fn purge_stale(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut purged = 0;
        entries.retain(|_, users| {
            let before = users.len();
            users.retain(|_, at| now.duration_since(*at) < self.timeout);
            purged += before - users.len();
            !users.is_empty()
        });
        purged
    }
}
