//! Two-factor backup code storage
//!
//! Codes are stored as SHA-256 hex digests. Consuming a code deletes it in the
//! same step that checks for it, so a code presented twice (even concurrently)
//! is accepted exactly once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use shared::DbPool;
use std::collections::HashSet;
use std::sync::Arc;

#[async_trait]
pub trait BackupCodeStore: Send + Sync {
    /// Replace a user's codes with a fresh set
    async fn replace_all(&self, user_id: &str, code_hashes: &[String]) -> Result<()>;

    /// Remove the code if present; true when this call removed it
    async fn consume(&self, user_id: &str, code_hash: &str) -> Result<bool>;

    /// Drop every code for a user
    async fn clear(&self, user_id: &str) -> Result<()>;

    async fn remaining(&self, user_id: &str) -> Result<usize>;
}

pub struct PgBackupCodeStore {
    pool: DbPool,
}

impl PgBackupCodeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackupCodeStore for PgBackupCodeStore {
    async fn replace_all(&self, user_id: &str, code_hashes: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM two_factor_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear backup codes")?;

        sqlx::query(
            r#"
            INSERT INTO two_factor_backup_codes (user_id, code_hash)
            SELECT $1, UNNEST($2::TEXT[])
            "#,
        )
        .bind(user_id)
        .bind(code_hashes)
        .execute(&mut *tx)
        .await
        .context("Failed to store backup codes")?;

        tx.commit().await.context("Failed to commit backup codes")?;
        Ok(())
    }

    async fn consume(&self, user_id: &str, code_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM two_factor_backup_codes WHERE user_id = $1 AND code_hash = $2",
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await
        .context("Failed to consume backup code")?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM two_factor_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to clear backup codes")?;
        Ok(())
    }

    async fn remaining(&self, user_id: &str) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM two_factor_backup_codes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count backup codes")?;

        Ok(count.max(0) as usize)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBackupCodeStore {
    codes: Arc<DashMap<String, HashSet<String>>>,
}

impl InMemoryBackupCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupCodeStore for InMemoryBackupCodeStore {
    async fn replace_all(&self, user_id: &str, code_hashes: &[String]) -> Result<()> {
        self.codes
            .insert(user_id.to_string(), code_hashes.iter().cloned().collect());
        Ok(())
    }

    async fn consume(&self, user_id: &str, code_hash: &str) -> Result<bool> {
        Ok(self
            .codes
            .get_mut(user_id)
            .map(|mut set| set.remove(code_hash))
            .unwrap_or(false))
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        self.codes.remove(user_id);
        Ok(())
    }

    async fn remaining(&self, user_id: &str) -> Result<usize> {
        Ok(self.codes.get(user_id).map(|set| set.len()).unwrap_or(0))
    }
}
