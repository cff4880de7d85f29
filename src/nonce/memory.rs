//! Bounded in-process nonce store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{NonceStats, NonceStore, NonceStoreError};
use crate::error::nonce_hint;
use crate::utils::unix_now;

/// Backend name reported by [`InMemoryNonceStore`].
pub const BACKEND_NAME: &str = "in-process";

/// Default minimum time between sweeps of expired entries.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    expires_at: i64,
    /// Value of the access counter at the last read or write.
    last_access: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    access_counter: u64,
    last_cleanup: i64,
    recorded: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Drop expired entries if at least `interval` seconds passed since the
    /// previous sweep.
    fn maybe_cleanup(&mut self, now: i64, interval: i64) {
        if now.saturating_sub(self.last_cleanup) < interval {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at >= now);
        self.last_cleanup = now;

        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept expired nonces");
        }
    }

    /// Evict the least recently accessed quarter (at least one entry).
    fn evict(&mut self) {
        let count = (self.entries.len() / 4).max(1);

        let mut by_access: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(nonce, entry)| (entry.last_access, nonce.clone()))
            .collect();
        by_access.sort_unstable_by_key(|(access, _)| *access);

        for (_, nonce) in by_access.into_iter().take(count) {
            self.entries.remove(&nonce);
        }
        warn!(evicted = count, "Nonce store full; evicted least recently used entries");
    }

    fn insert(&mut self, nonce: &str, expires_at: i64, max_size: usize) {
        if !self.entries.contains_key(nonce) && self.entries.len() >= max_size {
            self.evict();
        }
        let last_access = self.touch();
        self.entries.insert(
            nonce.to_string(),
            Entry {
                expires_at,
                last_access,
            },
        );
        self.recorded += 1;
    }
}

/// Process-local nonce registry with lazy expiry and LRU eviction.
///
/// All operations take a single mutex, so `check_and_mark` is atomic with
/// respect to every other call on the same store. Replay protection is not
/// shared between processes.
#[derive(Debug)]
pub struct InMemoryNonceStore {
    inner: Mutex<Inner>,
    max_size: usize,
    cleanup_interval: i64,
}

impl InMemoryNonceStore {
    /// Create a store holding at most `max_size` nonces (minimum 1).
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_cleanup: unix_now(),
                ..Inner::default()
            }),
            max_size: max_size.max(1),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL.as_secs() as i64,
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether `nonce` is held and unexpired at `now`. Refreshes its recency.
    pub fn is_used_at(&self, nonce: &str, now: i64) -> bool {
        let mut inner = self.inner.lock();
        inner.maybe_cleanup(now, self.cleanup_interval);

        let access = inner.touch();
        match inner.entries.get_mut(nonce) {
            Some(entry) => {
                entry.last_access = access;
                now <= entry.expires_at
            }
            None => false,
        }
    }

    pub fn mark_used_at(&self, nonce: &str, expires_at: i64, now: i64) {
        let mut inner = self.inner.lock();
        inner.maybe_cleanup(now, self.cleanup_interval);
        inner.insert(nonce, expires_at, self.max_size);
    }

    /// Record `nonce` unless it is held and unexpired at `now`.
    pub fn check_and_mark_at(&self, nonce: &str, expires_at: i64, now: i64) -> bool {
        let mut inner = self.inner.lock();
        inner.maybe_cleanup(now, self.cleanup_interval);

        if inner
            .entries
            .get(nonce)
            .is_some_and(|entry| now <= entry.expires_at)
        {
            debug!(nonce = %nonce_hint(nonce), "Nonce already claimed");
            return false;
        }
        inner.insert(nonce, expires_at, self.max_size);
        true
    }

    pub fn stats_at(&self, now: i64) -> NonceStats {
        let inner = self.inner.lock();
        let total = inner.entries.len();
        let active = inner
            .entries
            .values()
            .filter(|entry| now <= entry.expires_at)
            .count();

        NonceStats {
            backend: BACKEND_NAME,
            total_entries: total,
            active_entries: active,
            expired_entries: total - active,
            max_size: Some(self.max_size),
            recorded_total: inner.recorded,
            ttl_managed: false,
        }
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn is_used(&self, nonce: &str) -> Result<bool, NonceStoreError> {
        Ok(self.is_used_at(nonce, unix_now()))
    }

    async fn mark_used(&self, nonce: &str, expires_at: i64) -> Result<(), NonceStoreError> {
        self.mark_used_at(nonce, expires_at, unix_now());
        Ok(())
    }

    async fn check_and_mark(
        &self,
        nonce: &str,
        expires_at: i64,
    ) -> Result<bool, NonceStoreError> {
        Ok(self.check_and_mark_at(nonce, expires_at, unix_now()))
    }

    async fn stats(&self) -> NonceStats {
        self.stats_at(unix_now())
    }
}
