//! User info cache
//!
//! Username-keyed snapshots of users with their roles. Entries expire after
//! a TTL; expired entries are invisible to reads and removed by a periodic
//! sweep.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::models::User;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(48 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    user: User,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Bumped by `flush`.
    flushes: u64,
    /// Bumped per key by `set` and `delete`.
    versions: HashMap<String, u64>,
}

impl CacheState {
    fn stamp(&self, username: &str) -> (u64, u64) {
        (self.flushes, self.versions.get(username).copied().unwrap_or(0))
    }

    fn insert(&mut self, entry: CacheEntry) {
        let username = entry.user.username.clone();
        *self.versions.entry(username.clone()).or_insert(0) += 1;
        self.entries.insert(username, entry);
    }
}

pub struct UserInfoCache {
    state: RwLock<CacheState>,
    ttl: Duration,
}

impl Default for UserInfoCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl UserInfoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn entry(&self, user: User, ttl: Duration) -> CacheEntry {
        CacheEntry {
            expires_at: Instant::now() + ttl,
            user,
        }
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.read()
            .entries
            .get(username)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.user.clone())
    }

    pub fn set(&self, user: User) {
        self.set_with_ttl(user, self.ttl);
    }

    pub fn set_with_ttl(&self, user: User, ttl: Duration) {
        let entry = self.entry(user, ttl);
        self.write().insert(entry);
    }

    pub fn delete(&self, username: &str) {
        let mut state = self.write();
        state.entries.remove(username);
        *state.versions.entry(username.to_string()).or_insert(0) += 1;
    }

    /// Drops every entry.
    pub fn flush(&self) {
        let mut state = self.write();
        debug!(entries = state.entries.len(), "Flushing user cache");
        state.entries.clear();
        state.versions.clear();
        state.flushes += 1;
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.write();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    /// Read-through lookup. A successful load populates the entry unless the
    /// key was set, deleted or flushed while loading; a failed load evicts it.
    pub fn get_or_load<E, F>(&self, username: &str, loader: F) -> Result<User, E>
    where
        F: FnOnce(&str) -> Result<User, E>,
    {
        if let Some(user) = self.get(username) {
            return Ok(user);
        }
        let stamp = self.read().stamp(username);
        match loader(username) {
            Ok(user) => {
                let entry = self.entry(user.clone(), self.ttl);
                let mut state = self.write();
                if state.stamp(username) == stamp {
                    state.insert(entry);
                } else {
                    debug!(user = username, "Cache changed during load, not storing");
                }
                Ok(user)
            }
            Err(err) => {
                self.delete(username);
                Err(err)
            }
        }
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired user cache entries");
                }
            }
        })
    }
}
