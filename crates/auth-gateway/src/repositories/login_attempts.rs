//! Login attempt audit log (append-only)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{DbPool, LoginAttemptRecord};
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn append(&self, record: &LoginAttemptRecord) -> Result<()>;

    /// Delete records created before `cutoff`, returning how many were removed
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct PgAttemptLog {
    pool: DbPool,
}

impl PgAttemptLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptLog for PgAttemptLog {
    async fn append(&self, record: &LoginAttemptRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts (ip, username, success, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.ip)
        .bind(&record.username)
        .bind(record.success)
        .bind(record.user_agent.as_deref())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to record login attempt")?;

        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to purge login attempts")?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAttemptLog {
    records: Arc<Mutex<Vec<LoginAttemptRecord>>>,
}

impl InMemoryAttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, oldest first
    pub fn records(&self) -> Vec<LoginAttemptRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AttemptLog for InMemoryAttemptLog {
    async fn append(&self, record: &LoginAttemptRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
