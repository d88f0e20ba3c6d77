//! Redis client and utilities
//!
//! This module provides Redis connection management and the Redis-backed
//! counter store used when several gateway instances share limits.

pub mod counter_store;

pub use counter_store::RedisCounterStore;

use crate::error::{Error, Result};
use redis::{aio::ConnectionManager, Client};

/// Create a Redis connection manager from a URL
pub async fn create_client(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url).map_err(|e| Error::config(format!("Invalid Redis URL: {}", e)))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| Error::store_unavailable(format!("Failed to connect to Redis: {}", e)))
}
