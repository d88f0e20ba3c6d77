//! Redis-backed Counter Store
//!
//! Shares counters across gateway instances. Increment and expiry are applied
//! by a single Lua script so a key is never observable without a TTL, and
//! concurrent increments from different instances each see a distinct value.
//!
//! Keys are stored under an optional namespace (`{namespace}:{key}`) so several
//! deployments can share one Redis without colliding. The namespace is
//! stripped again from keys returned by [`CounterStore::scan_prefix`].

use crate::counter_store::{CounterStore, ExpiryPolicy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, error};

/// Atomic increment with TTL handling
///
/// KEYS[1] = counter key
/// ARGV[1] = ttl in milliseconds
/// ARGV[2] = "1" to re-arm the TTL on every increment (sliding), "0" otherwise
///
/// The TTL is also applied when the key somehow has none (PTTL == -1), so a
/// counter can never become immortal.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or ARGV[2] == '1' or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Batch size hint for SCAN
const SCAN_COUNT: usize = 500;

/// Redis [`CounterStore`]
#[derive(Clone)]
pub struct RedisCounterStore {
    redis: ConnectionManager,
    script: Script,
    namespace: Option<String>,
}

impl RedisCounterStore {
    /// Create a store using keys exactly as given
    pub fn new(redis: ConnectionManager) -> Self {
        Self::with_namespace(redis, None)
    }

    /// Create a store that prefixes every key with `namespace:`
    pub fn with_namespace(redis: ConnectionManager, namespace: Option<String>) -> Self {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        debug!(namespace = ?namespace, "Redis counter store initialized");

        Self {
            redis,
            script: Script::new(INCREMENT_SCRIPT),
            namespace,
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    fn strip_namespace(&self, key: String) -> String {
        match &self.namespace {
            Some(ns) => key
                .strip_prefix(ns.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .map(str::to_string)
                .unwrap_or(key),
            None => key,
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PEXPIRE with 0 deletes the key immediately
    (ttl.as_millis() as u64).max(1)
}

fn unavailable(operation: &str, key: &str, err: redis::RedisError) -> Error {
    error!(operation = operation, key = key, error = %err, "Redis counter operation failed");
    Error::store_unavailable(format!("{} failed: {}", operation, err))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration, policy: ExpiryPolicy) -> Result<i64> {
        let full_key = self.full_key(key);
        let sliding = if policy == ExpiryPolicy::Sliding { "1" } else { "0" };

        let mut conn = self.redis.clone();
        self.script
            .key(&full_key)
            .arg(ttl_millis(ttl))
            .arg(sliding)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| unavailable("increment", &full_key, e))
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let full_key = self.full_key(key);
        let mut conn = self.redis.clone();
        let value: Option<i64> = conn
            .get(&full_key)
            .await
            .map_err(|e| unavailable("get", &full_key, e))?;

        Ok(value.unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(&full_key)
            .await
            .map_err(|e| unavailable("reset", &full_key, e))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Duration> {
        let full_key = self.full_key(key);
        let mut conn = self.redis.clone();
        // -2 = missing, -1 = no expiry
        let millis: i64 = conn
            .pttl(&full_key)
            .await
            .map_err(|e| unavailable("ttl_remaining", &full_key, e))?;

        Ok(if millis > 0 {
            Duration::from_millis(millis as u64)
        } else {
            Duration::ZERO
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.full_key(prefix));
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("scan_prefix", &pattern, e))?;

            keys.extend(batch.into_iter().map(|k| self.strip_namespace(k)));

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}
