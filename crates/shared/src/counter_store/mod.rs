//! Counter Store
//!
//! A key/value counter with atomic increment and per-key expiry. It is the one
//! piece of shared mutable state behind both the brute-force attempt tracker
//! and the route rate limiter; each policy namespaces its own keys
//! (`bf:*`, `rl:*`) so they never observe each other's counts.
//!
//! # Implementations
//!
//! - [`InMemoryCounterStore`]: DashMap-backed, for single-instance deployments
//!   and tests. Expiry is evaluated lazily on read and by a background
//!   eviction task.
//! - [`crate::redis::RedisCounterStore`]: Redis-backed, for multi-instance
//!   deployments. Increment and TTL are applied by one Lua script.
//!
//! The backend is picked once at construction time (see [`crate::config::CounterBackend`]);
//! callers only ever see `Arc<dyn CounterStore>`.
//!
//! # Failure policy
//!
//! Implementations return [`crate::Error::StoreUnavailable`] when the backend
//! cannot be reached. They do not decide what that means: the rate limiter and
//! the attempt tracker translate it into fail-open behaviour and log it.

pub mod memory;

pub use memory::InMemoryCounterStore;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// How an increment treats the key's time-to-live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// TTL is set when the key is created and never moved afterwards
    Fixed,
    /// TTL is re-armed on every increment (expires `ttl` after the last hit)
    Sliding,
}

/// Atomic counter storage with expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the post-increment value.
    ///
    /// A missing or expired key starts from zero and receives `ttl` in the
    /// same atomic step, so a counter can never exist without an expiry.
    /// Concurrent callers on the same key each observe a distinct value.
    async fn increment(&self, key: &str, ttl: Duration, policy: ExpiryPolicy) -> Result<i64>;

    /// Current value, zero when the key is missing or expired
    async fn get(&self, key: &str) -> Result<i64>;

    /// Delete the key
    async fn reset(&self, key: &str) -> Result<()>;

    /// Time until the key expires, zero when it is missing or expired
    async fn ttl_remaining(&self, key: &str) -> Result<Duration>;

    /// Live keys starting with `prefix` (operator visibility only, not the request path)
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Shared counter store handle
pub type SharedCounterStore = Arc<dyn CounterStore>;
