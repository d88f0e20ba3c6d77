//! Fixed-window request rate limiter
//!
//! Each route class has its own key namespace (`rl:auth`, `rl:api`,
//! `rl:upload`), so exhausting one class never touches another class's budget
//! for the same client.
//!
//! # Window semantics
//!
//! Windows are aligned to `floor(now / window) * window` and the counter key
//! embeds the window start, so every window gets a fresh counter. A client may
//! legally send `limit` requests at the very end of one window and `limit`
//! more at the start of the next.
//!
//! # Graceful degradation
//!
//! If the counter store is unavailable the limiter fails open: the request is
//! allowed, the decision is flagged `degraded`, and the failure is logged and
//! counted in `counter_store_errors_total`.

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::counter_store::{ExpiryPolicy, SharedCounterStore};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Route class (determines the key namespace and default quota)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Login, refresh and 2FA endpoints
    Auth,
    /// General API traffic
    Api,
    /// File and backup uploads
    Upload,
}

impl RouteClass {
    /// Counter key namespace for this class
    pub fn key_prefix(&self) -> &'static str {
        match self {
            RouteClass::Auth => "rl:auth",
            RouteClass::Api => "rl:api",
            RouteClass::Upload => "rl:upload",
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::Api => "api",
            RouteClass::Upload => "upload",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota for one route class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// The configured limit
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix timestamp when the current window ends
    pub reset_at: i64,
    /// Seconds until the window ends; zero when allowed
    pub retry_after: u64,
    /// True when the counter store failed and the limiter failed open
    pub degraded: bool,
}

impl RateLimitDecision {
    fn fail_open(limit: u32, reset_at: i64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at,
            retry_after: 0,
            degraded: true,
        }
    }
}

/// Start and end (exclusive) of the fixed window containing `now_secs`
pub fn window_bounds(now_secs: i64, window: Duration) -> (i64, i64) {
    let width = window.as_secs().max(1) as i64;
    let start = now_secs - now_secs.rem_euclid(width);
    (start, start + width)
}

/// Fixed-window rate limiter over a [`crate::counter_store::CounterStore`]
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedCounterStore,
    clock: SharedClock,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: SharedCounterStore, clock: SharedClock, config: RateLimitConfig) -> Self {
        debug!(
            auth_limit = config.auth_limit,
            api_limit = config.api_limit,
            upload_limit = config.upload_limit,
            window_secs = config.window.as_secs(),
            "Rate limiter initialized"
        );

        Self {
            store,
            clock,
            config,
        }
    }

    /// Configured quota for a route class
    pub fn policy(&self, class: RouteClass) -> RateLimitPolicy {
        let limit = match class {
            RouteClass::Auth => self.config.auth_limit,
            RouteClass::Api => self.config.api_limit,
            RouteClass::Upload => self.config.upload_limit,
        };

        RateLimitPolicy {
            limit,
            window: self.config.window,
        }
    }

    /// Count one request for `client_key` using the class's configured quota
    pub async fn check(&self, class: RouteClass, client_key: &str) -> RateLimitDecision {
        let policy = self.policy(class);
        self.allow(class, client_key, policy.limit, policy.window).await
    }

    /// Count one request for `client_key` against an explicit quota
    ///
    /// Every call consumes from the window, including rejected ones.
    pub async fn allow(
        &self,
        class: RouteClass,
        client_key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let now = self.clock.now().timestamp();
        let (window_start, reset_at) = window_bounds(now, window);
        let key = format!("{}:{}:{}", class.key_prefix(), client_key, window_start);
        let ttl = Duration::from_secs((reset_at - now).max(1) as u64);

        let count = match self.store.increment(&key, ttl, ExpiryPolicy::Fixed).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    class = %class,
                    client = client_key,
                    error = %e,
                    "Counter store unavailable, failing open (allowing request)"
                );
                metrics::counter!("counter_store_errors_total", "operation" => "rate_limit")
                    .increment(1);
                return RateLimitDecision::fail_open(limit, reset_at);
            }
        };

        let allowed = count <= i64::from(limit);
        let remaining = (i64::from(limit) - count).max(0) as u32;
        let retry_after = if allowed { 0 } else { (reset_at - now).max(1) as u64 };

        if allowed {
            debug!(class = %class, client = client_key, count = count, remaining = remaining, "Rate limit check: ALLOWED");
        } else {
            warn!(
                class = %class,
                client = client_key,
                count = count,
                limit = limit,
                retry_after = retry_after,
                "Rate limit check: REJECTED"
            );
            metrics::counter!("rate_limit_rejections_total", "class" => class.as_str()).increment(1);
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining,
            reset_at,
            retry_after,
            degraded: false,
        }
    }
}
