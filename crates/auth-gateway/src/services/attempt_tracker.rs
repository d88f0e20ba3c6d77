//! Brute-force Attempt Tracker
//!
//! Counts failed logins per client identity and escalates to a temporary
//! block. All per-identity state lives in the Counter Store, so the tracker
//! itself holds no locks and one client's failures never serialize another's.
//!
//! # Keys
//!
//! - `bf:fail:{identity}`: failure count. Sliding TTL of one window, so a gap
//!   longer than the window between failures starts a fresh count.
//! - `bf:block:{identity}`: present while blocked. Fixed TTL of one block
//!   duration from the triggering failure; later failures never extend it.
//!
//! # Failure policy
//!
//! Counter store errors fail open: `is_blocked` answers "not blocked" and
//! recording is skipped, both with a warning and a
//! `counter_store_errors_total` increment. Operator calls (`unblock`,
//! `list_blocked`) propagate the error instead.

use chrono::TimeDelta;
use shared::clock::SharedClock;
use shared::config::{BlockingScope, BruteForceConfig};
use shared::{ExpiryPolicy, SharedCounterStore};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::models::BlockedIdentity;
use crate::services::security_events::{SecurityEvent, SharedEventSink};

const FAIL_PREFIX: &str = "bf:fail:";
const BLOCK_PREFIX: &str = "bf:block:";

/// Who failures are counted against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn ip(ip: &str) -> Self {
        Self(format!("ip:{}", ip))
    }

    pub fn ip_and_username(ip: &str, username: &str) -> Self {
        Self(format!("ip:{}|user:{}", ip, username.trim().to_lowercase()))
    }

    /// Parse an identity supplied by an operator; a bare address means `ip:{address}`
    pub fn parse(raw: &str) -> AuthResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > 512 {
            return Err(AuthError::validation("Identity must be 1-512 characters"));
        }
        if raw.starts_with("ip:") {
            Ok(Self(raw.to_string()))
        } else {
            Ok(Self::ip(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current block state of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStatus {
    pub blocked: bool,
    /// Seconds until the block lifts, rounded up
    pub retry_after: u64,
    /// Counter store failed; the answer is the fail-open default
    pub degraded: bool,
}

/// Result of recording one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Failures counted in the current window after this attempt
    pub failures: i64,
    /// This attempt started a new block
    pub newly_blocked: bool,
    pub degraded: bool,
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

pub struct AttemptTracker {
    store: SharedCounterStore,
    clock: SharedClock,
    config: BruteForceConfig,
    events: SharedEventSink,
}

impl AttemptTracker {
    pub fn new(
        store: SharedCounterStore,
        clock: SharedClock,
        config: BruteForceConfig,
        events: SharedEventSink,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            events,
        }
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    /// Identity for a login attempt under the configured scope
    pub fn identity_for(&self, ip: &str, username: &str) -> ClientIdentity {
        match self.config.scope {
            BlockingScope::Ip => ClientIdentity::ip(ip),
            BlockingScope::IpAndUsername => ClientIdentity::ip_and_username(ip, username),
        }
    }

    fn fail_key(identity: &ClientIdentity) -> String {
        format!("{}{}", FAIL_PREFIX, identity)
    }

    fn block_key(identity: &ClientIdentity) -> String {
        format!("{}{}", BLOCK_PREFIX, identity)
    }

    fn store_degraded(&self, operation: &'static str, identity: &ClientIdentity, err: &shared::Error) {
        warn!(
            identity = %identity,
            operation = operation,
            error = %err,
            "Counter store unavailable, failing open"
        );
        metrics::counter!("counter_store_errors_total", "operation" => operation).increment(1);
    }

    pub async fn is_blocked(&self, identity: &ClientIdentity) -> bool {
        self.block_status(identity).await.blocked
    }

    pub async fn block_status(&self, identity: &ClientIdentity) -> BlockStatus {
        match self.store.ttl_remaining(&Self::block_key(identity)).await {
            Ok(remaining) if !remaining.is_zero() => BlockStatus {
                blocked: true,
                retry_after: ceil_secs(remaining).max(1),
                degraded: false,
            },
            Ok(_) => BlockStatus {
                blocked: false,
                retry_after: 0,
                degraded: false,
            },
            Err(e) => {
                self.store_degraded("block_check", identity, &e);
                BlockStatus {
                    blocked: false,
                    retry_after: 0,
                    degraded: true,
                }
            }
        }
    }

    /// Record one login attempt.
    ///
    /// A failure is counted within the window; reaching the threshold applies
    /// a block and restarts the count. A success clears both unconditionally.
    pub async fn record_attempt(&self, identity: &ClientIdentity, success: bool) -> AttemptOutcome {
        if success {
            return self.clear(identity).await;
        }

        let failures = match self
            .store
            .increment(&Self::fail_key(identity), self.config.window, ExpiryPolicy::Sliding)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                self.store_degraded("record_failure", identity, &e);
                return AttemptOutcome {
                    failures: 0,
                    newly_blocked: false,
                    degraded: true,
                };
            }
        };

        debug!(identity = %identity, failures = failures, "Failed login attempt recorded");

        if failures < i64::from(self.config.max_attempts) {
            return AttemptOutcome {
                failures,
                newly_blocked: false,
                degraded: false,
            };
        }

        // Fixed policy: an existing block keeps its original expiry
        let newly_blocked = match self
            .store
            .increment(&Self::block_key(identity), self.config.block_duration, ExpiryPolicy::Fixed)
            .await
        {
            Ok(trips) => trips == 1,
            Err(e) => {
                self.store_degraded("apply_block", identity, &e);
                return AttemptOutcome {
                    failures,
                    newly_blocked: false,
                    degraded: true,
                };
            }
        };

        if let Err(e) = self.store.reset(&Self::fail_key(identity)).await {
            self.store_degraded("reset_failures", identity, &e);
        }

        if newly_blocked {
            info!(
                identity = %identity,
                failures = failures,
                block_secs = self.config.block_duration.as_secs(),
                "Identity blocked after repeated failures"
            );
            metrics::counter!("brute_force_blocks_total").increment(1);
            self.events.record(SecurityEvent::BlockApplied {
                identity: identity.to_string(),
                failures,
                block_secs: self.config.block_duration.as_secs(),
            });
        }

        AttemptOutcome {
            failures,
            newly_blocked,
            degraded: false,
        }
    }

    async fn clear(&self, identity: &ClientIdentity) -> AttemptOutcome {
        let mut degraded = false;
        for key in [Self::fail_key(identity), Self::block_key(identity)] {
            if let Err(e) = self.store.reset(&key).await {
                self.store_degraded("clear", identity, &e);
                degraded = true;
            }
        }

        AttemptOutcome {
            failures: 0,
            newly_blocked: false,
            degraded,
        }
    }

    /// Failures counted in the current window
    pub async fn failure_count(&self, identity: &ClientIdentity) -> AuthResult<i64> {
        Ok(self.store.get(&Self::fail_key(identity)).await?)
    }

    /// Operator override: clear the count and any block immediately
    pub async fn unblock(&self, identity: &ClientIdentity, operator: &str) -> AuthResult<()> {
        self.store.reset(&Self::block_key(identity)).await?;
        self.store.reset(&Self::fail_key(identity)).await?;

        self.events.record(SecurityEvent::IdentityUnblocked {
            identity: identity.to_string(),
            operator: operator.to_string(),
        });
        Ok(())
    }

    /// Currently blocked identities, soonest-to-expire first
    pub async fn list_blocked(&self) -> AuthResult<Vec<BlockedIdentity>> {
        let now = self.clock.now();
        let keys = self.store.scan_prefix(BLOCK_PREFIX).await?;

        let mut blocked = Vec::with_capacity(keys.len());
        for key in keys {
            let remaining = self.store.ttl_remaining(&key).await?;
            if remaining.is_zero() {
                continue;
            }
            let Some(identity) = key.strip_prefix(BLOCK_PREFIX) else {
                continue;
            };
            let retry_after = ceil_secs(remaining);
            blocked.push(BlockedIdentity {
                identity: identity.to_string(),
                retry_after,
                blocked_until: now + TimeDelta::seconds(retry_after as i64),
            });
        }

        blocked.sort_by(|a, b| a.retry_after.cmp(&b.retry_after).then(a.identity.cmp(&b.identity)));
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::security_events::InMemoryEventSink;
    use async_trait::async_trait;
    use mockall::mock;
    use shared::{CounterStore, InMemoryCounterStore, ManualClock};
    use std::sync::Arc;

    mock! {
        pub Store {}

        #[async_trait]
        impl CounterStore for Store {
            async fn increment(&self, key: &str, ttl: Duration, policy: ExpiryPolicy) -> shared::Result<i64>;
            async fn get(&self, key: &str) -> shared::Result<i64>;
            async fn reset(&self, key: &str) -> shared::Result<()>;
            async fn ttl_remaining(&self, key: &str) -> shared::Result<Duration>;
            async fn scan_prefix(&self, prefix: &str) -> shared::Result<Vec<String>>;
        }
    }

    struct Fixture {
        tracker: AttemptTracker,
        clock: ManualClock,
        events: InMemoryEventSink,
    }

    fn fixture(scope: BlockingScope) -> Fixture {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let store = Arc::new(InMemoryCounterStore::with_clock(shared_clock.clone()));
        let events = InMemoryEventSink::new();
        let config = BruteForceConfig {
            scope,
            ..BruteForceConfig::default()
        };

        Fixture {
            tracker: AttemptTracker::new(store, shared_clock, config, Arc::new(events.clone())),
            clock,
            events,
        }
    }

    #[tokio::test]
    async fn test_blocks_after_max_attempts() {
        let f = fixture(BlockingScope::Ip);
        let id = ClientIdentity::ip("1.2.3.4");

        for n in 1..5 {
            let outcome = f.tracker.record_attempt(&id, false).await;
            assert_eq!(outcome.failures, n);
            assert!(!outcome.newly_blocked);
            assert!(!f.tracker.is_blocked(&id).await);
        }

        let fifth = f.tracker.record_attempt(&id, false).await;
        assert!(fifth.newly_blocked);
        assert!(f.tracker.is_blocked(&id).await);

        let status = f.tracker.block_status(&id).await;
        assert_eq!(status.retry_after, 1800);
        assert_eq!(
            f.events.events(),
            vec![SecurityEvent::BlockApplied {
                identity: "ip:1.2.3.4".to_string(),
                failures: 5,
                block_secs: 1800,
            }]
        );
    }

    #[tokio::test]
    async fn test_block_expires_without_intervention() {
        let f = fixture(BlockingScope::Ip);
        let id = ClientIdentity::ip("1.2.3.4");

        for _ in 0..5 {
            f.tracker.record_attempt(&id, false).await;
        }

        f.clock.advance(Duration::from_secs(1799));
        assert!(f.tracker.is_blocked(&id).await);

        f.clock.advance(Duration::from_secs(1));
        assert!(!f.tracker.is_blocked(&id).await);
    }

    #[tokio::test]
    async fn test_failures_while_blocked_do_not_extend_block() {
        let f = fixture(BlockingScope::Ip);
        let id = ClientIdentity::ip("1.2.3.4");

        for _ in 0..5 {
            f.tracker.record_attempt(&id, false).await;
        }

        f.clock.advance(Duration::from_secs(600));
        for _ in 0..10 {
            f.tracker.record_attempt(&id, false).await;
        }

        assert_eq!(f.tracker.block_status(&id).await.retry_after, 1200);
        f.clock.advance(Duration::from_secs(1200));
        assert!(!f.tracker.is_blocked(&id).await);
        assert_eq!(f.events.events().len(), 1, "only the first trip is a new block");
    }

    #[tokio::test]
    async fn test_success_clears_failures_and_block() {
        let f = fixture(BlockingScope::Ip);
        let id = ClientIdentity::ip("1.2.3.4");

        for _ in 0..3 {
            f.tracker.record_attempt(&id, false).await;
        }
        assert_eq!(f.tracker.failure_count(&id).await.unwrap(), 3);

        f.tracker.record_attempt(&id, true).await;
        assert_eq!(f.tracker.failure_count(&id).await.unwrap(), 0);

        for _ in 0..5 {
            f.tracker.record_attempt(&id, false).await;
        }
        assert!(f.tracker.is_blocked(&id).await);

        f.tracker.record_attempt(&id, true).await;
        assert!(!f.tracker.is_blocked(&id).await);
        assert_eq!(f.tracker.failure_count(&id).await.unwrap(), 0);

        // A second success is a no-op
        f.tracker.record_attempt(&id, true).await;
        assert_eq!(f.tracker.failure_count(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_window_resets_after_quiet_period() {
        let f = fixture(BlockingScope::Ip);
        let id = ClientIdentity::ip("1.2.3.4");

        for _ in 0..4 {
            f.tracker.record_attempt(&id, false).await;
        }

        f.clock.advance(Duration::from_secs(901));

        let outcome = f.tracker.record_attempt(&id, false).await;
        assert_eq!(outcome.failures, 1);
        assert!(!f.tracker.is_blocked(&id).await);
    }

    #[tokio::test]
    async fn test_failures_within_window_keep_accumulating() {
        let f = fixture(BlockingScope::Ip);
        let id = ClientIdentity::ip("1.2.3.4");

        // Each gap is shorter than the window even though the total span is not
        for _ in 0..4 {
            f.tracker.record_attempt(&id, false).await;
            f.clock.advance(Duration::from_secs(600));
        }

        assert!(f.tracker.record_attempt(&id, false).await.newly_blocked);
    }

    #[tokio::test]
    async fn test_ip_scope_shares_budget_behind_one_address() {
        let f = fixture(BlockingScope::Ip);

        for _ in 0..5 {
            let id = f.tracker.identity_for("10.0.0.1", "mallory");
            f.tracker.record_attempt(&id, false).await;
        }

        let neighbour = f.tracker.identity_for("10.0.0.1", "alice");
        assert!(f.tracker.is_blocked(&neighbour).await);
    }

    #[tokio::test]
    async fn test_ip_and_username_scope_isolates_users() {
        let f = fixture(BlockingScope::IpAndUsername);

        for _ in 0..5 {
            let id = f.tracker.identity_for("10.0.0.1", "mallory");
            f.tracker.record_attempt(&id, false).await;
        }

        assert!(f.tracker.is_blocked(&f.tracker.identity_for("10.0.0.1", "Mallory")).await);
        assert!(!f.tracker.is_blocked(&f.tracker.identity_for("10.0.0.1", "alice")).await);
    }

    #[tokio::test]
    async fn test_unblock_and_list_blocked() {
        let f = fixture(BlockingScope::Ip);
        let a = ClientIdentity::ip("1.1.1.1");
        let b = ClientIdentity::ip("2.2.2.2");

        for _ in 0..5 {
            f.tracker.record_attempt(&a, false).await;
        }
        f.clock.advance(Duration::from_secs(60));
        for _ in 0..5 {
            f.tracker.record_attempt(&b, false).await;
        }

        let listed = f.tracker.list_blocked().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].identity, "ip:1.1.1.1");
        assert_eq!(listed[0].retry_after, 1740);
        assert_eq!(listed[1].identity, "ip:2.2.2.2");

        f.tracker.unblock(&a, "admin-1").await.unwrap();
        assert!(!f.tracker.is_blocked(&a).await);
        assert_eq!(f.tracker.list_blocked().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let shared_clock: SharedClock = Arc::new(clock);
        let store = Arc::new(InMemoryCounterStore::with_clock(shared_clock.clone()));
        let config = BruteForceConfig {
            max_attempts: 1_000,
            ..BruteForceConfig::default()
        };
        let tracker = Arc::new(AttemptTracker::new(
            store,
            shared_clock,
            config,
            Arc::new(InMemoryEventSink::new()),
        ));
        let id = ClientIdentity::ip("9.9.9.9");

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let tracker = tracker.clone();
                let id = id.clone();
                tokio::spawn(async move { tracker.record_attempt(&id, false).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.failure_count(&id).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let mut store = MockStore::new();
        store
            .expect_ttl_remaining()
            .returning(|_| Err(shared::Error::store_unavailable("timeout")));
        store
            .expect_increment()
            .returning(|_, _, _| Err(shared::Error::store_unavailable("timeout")));

        let clock: SharedClock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        let tracker = AttemptTracker::new(
            Arc::new(store),
            clock,
            BruteForceConfig::default(),
            Arc::new(InMemoryEventSink::new()),
        );
        let id = ClientIdentity::ip("1.2.3.4");

        let status = tracker.block_status(&id).await;
        assert!(!status.blocked);
        assert!(status.degraded);

        let outcome = tracker.record_attempt(&id, false).await;
        assert!(outcome.degraded);
        assert!(!outcome.newly_blocked);
    }

    #[tokio::test]
    async fn test_operator_calls_surface_store_errors() {
        let mut store = MockStore::new();
        store
            .expect_scan_prefix()
            .returning(|_| Err(shared::Error::store_unavailable("down")));

        let clock: SharedClock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        let tracker = AttemptTracker::new(
            Arc::new(store),
            clock,
            BruteForceConfig::default(),
            Arc::new(InMemoryEventSink::new()),
        );

        assert!(matches!(tracker.list_blocked().await, Err(AuthError::Internal(_))));
    }

    #[test]
    fn test_parse_identity() {
        assert_eq!(ClientIdentity::parse("1.2.3.4").unwrap().as_str(), "ip:1.2.3.4");
        assert_eq!(
            ClientIdentity::parse("ip:1.2.3.4|user:bob").unwrap().as_str(),
            "ip:1.2.3.4|user:bob"
        );
        assert!(ClientIdentity::parse("  ").is_err());
    }
}
