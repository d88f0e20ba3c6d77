//! In-process counter store
//!
//! Entries live in a [`DashMap`], so an increment only locks the shard that
//! holds its key; unrelated clients never serialize through one mutex.
//! Expired entries read as zero immediately and are physically removed by
//! [`InMemoryCounterStore::evict_expired`], which the background task runner
//! calls on an interval.

use super::{CounterStore, ExpiryPolicy};
use crate::clock::{to_delta, SharedClock, SystemClock};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: i64,
    expires_at: DateTime<Utc>,
}

impl CounterEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed [`CounterStore`]
#[derive(Clone)]
pub struct InMemoryCounterStore {
    entries: Arc<DashMap<String, CounterEntry>>,
    clock: SharedClock,
}

impl InMemoryCounterStore {
    /// Create a store driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before.saturating_sub(self.entries.len());

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.entries.len(), "Evicted expired counters");
        }

        evicted
    }

    /// Number of physically stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration, policy: ExpiryPolicy) -> Result<i64> {
        let now = self.clock.now();
        let expires_at = now + to_delta(ttl);

        // The shard write lock is held for the whole read-modify-write of this entry.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at,
            });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = expires_at;
        }

        entry.count += 1;
        if policy == ExpiryPolicy::Sliding {
            entry.expires_at = expires_at;
        }

        Ok(entry.count)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Duration> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .and_then(|entry| (entry.expires_at - now).to_std().ok())
            .unwrap_or(Duration::ZERO))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix) && !item.value().is_expired(now))
            .map(|item| item.key().clone())
            .collect())
    }
}
