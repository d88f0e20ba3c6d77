//! Shared library for the AdminiSoftware authentication gateway
//!
//! This crate provides the infrastructure primitives the gateway is built on:
//! - Database connection pooling and migrations
//! - Data models matching the PostgreSQL schema
//! - Error handling types
//! - Configuration management
//! - Logging infrastructure
//! - The Counter Store (in-process and Redis) and the fixed-window rate limiter
//! - An injectable clock

pub mod clock;
pub mod config;
pub mod counter_store;
pub mod db;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod redis;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{BlockingScope, Config, CounterBackend, SecurityConfig};
pub use counter_store::{CounterStore, ExpiryPolicy, InMemoryCounterStore, SharedCounterStore};
pub use db::DbPool;
pub use error::{Error, Result};
pub use models::{AccountStatus, LoginAttemptRecord, Role, UserCredentials};
pub use rate_limit::{RateLimitDecision, RateLimiter, RouteClass};
pub use redis::RedisCounterStore;

/// Initialize tracing subscriber for structured logging
///
/// `RUST_LOG` controls filtering; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shared=debug,auth_gateway=debug,info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
