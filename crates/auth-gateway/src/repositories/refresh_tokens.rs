//! Refresh Token Repository
//!
//! Handles storage, rotation and revocation of refresh tokens. Only SHA-256
//! digests are stored; the raw token exists solely in the client's hands.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shared::DbPool;
use sqlx::FromRow;
use std::sync::Arc;

/// Refresh token record from storage
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// A token about to be stored
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<NewRefreshToken> for RefreshTokenRecord {
    fn from(t: NewRefreshToken) -> Self {
        Self {
            id: t.id,
            user_id: t.user_id,
            token_hash: t.token_hash,
            role: t.role,
            expires_at: t.expires_at,
            revoked_at: None,
            replaced_by: None,
            user_agent: t.user_agent,
            ip_address: t.ip_address,
            created_at: t.created_at,
        }
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: NewRefreshToken) -> Result<()>;

    /// Find a token by hash, revoked or not
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Revoke `old_id` and store `replacement` as one step.
    ///
    /// Returns false, storing nothing, when `old_id` was already revoked:
    /// of two concurrent rotations of the same token only one succeeds.
    async fn rotate(&self, old_id: &str, replacement: NewRefreshToken, now: DateTime<Utc>) -> Result<bool>;

    /// Revoke one token; false if it was already revoked or unknown
    async fn revoke(&self, token_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Revoke every live token of a user
    async fn revoke_all_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Delete tokens that expired or were revoked before `cutoff`
    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct PgRefreshTokenStore {
    pool: DbPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const INSERT_TOKEN: &str = r#"
    INSERT INTO refresh_tokens
        (id, user_id, token_hash, role, expires_at, user_agent, ip_address, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(&self, token: NewRefreshToken) -> Result<()> {
        sqlx::query(INSERT_TOKEN)
            .bind(&token.id)
            .bind(&token.user_id)
            .bind(&token.token_hash)
            .bind(&token.role)
            .bind(token.expires_at)
            .bind(token.user_agent.as_deref())
            .bind(token.ip_address.as_deref())
            .bind(token.created_at)
            .execute(&self.pool)
            .await
            .context("Failed to create refresh token")?;

        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_hash, role, expires_at, revoked_at, replaced_by,
                   user_agent, ip_address, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find refresh token")?;

        Ok(record)
    }

    async fn rotate(&self, old_id: &str, replacement: NewRefreshToken, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin refresh token rotation")?;

        // Row lock on the old token; a concurrent rotation waits here and then sees revoked_at set
        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2, replaced_by = $3
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(old_id)
        .bind(now)
        .bind(&replacement.id)
        .execute(&mut *tx)
        .await
        .context("Failed to revoke rotated refresh token")?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await.context("Failed to roll back rotation")?;
            return Ok(false);
        }

        sqlx::query(INSERT_TOKEN)
            .bind(&replacement.id)
            .bind(&replacement.user_id)
            .bind(&replacement.token_hash)
            .bind(&replacement.role)
            .bind(replacement.expires_at)
            .bind(replacement.user_agent.as_deref())
            .bind(replacement.ip_address.as_deref())
            .bind(replacement.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to store rotated refresh token")?;

        tx.commit().await.context("Failed to commit refresh token rotation")?;
        Ok(true)
    }

    async fn revoke(&self, token_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(token_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to revoke refresh token")?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to revoke all refresh tokens for user")?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at < $1
               OR revoked_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to cleanup expired refresh tokens")?;

        Ok(result.rows_affected())
    }
}

/// In-memory refresh token store
#[derive(Clone, Default)]
pub struct InMemoryRefreshTokenStore {
    by_id: Arc<DashMap<String, RefreshTokenRecord>>,
    id_by_hash: Arc<DashMap<String, String>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-revoked) tokens for a user
    pub fn active_count(&self, user_id: &str) -> usize {
        self.by_id
            .iter()
            .filter(|t| t.user_id == user_id && !t.is_revoked())
            .count()
    }

    fn store(&self, token: NewRefreshToken) {
        self.id_by_hash.insert(token.token_hash.clone(), token.id.clone());
        self.by_id.insert(token.id.clone(), token.into());
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, token: NewRefreshToken) -> Result<()> {
        self.store(token);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let Some(id) = self.id_by_hash.get(token_hash).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|t| t.value().clone()))
    }

    async fn rotate(&self, old_id: &str, replacement: NewRefreshToken, now: DateTime<Utc>) -> Result<bool> {
        {
            // Entry write lock makes check-and-revoke one step
            let Some(mut old) = self.by_id.get_mut(old_id) else {
                return Ok(false);
            };
            if old.is_revoked() {
                return Ok(false);
            }
            old.revoked_at = Some(now);
            old.replaced_by = Some(replacement.id.clone());
        }

        self.store(replacement);
        Ok(true)
    }

    async fn revoke(&self, token_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self.by_id.get_mut(token_id) {
            Some(mut token) if !token.is_revoked() => {
                token.revoked_at = Some(now);
                true
            }
            _ => false,
        })
    }

    async fn revoke_all_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut revoked = 0;
        for mut token in self.by_id.iter_mut() {
            if token.user_id == user_id && !token.is_revoked() {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let dead: Vec<(String, String)> = self
            .by_id
            .iter()
            .filter(|t| t.expires_at < cutoff || t.revoked_at.is_some_and(|at| at < cutoff))
            .map(|t| (t.id.clone(), t.token_hash.clone()))
            .collect();

        for (id, hash) in &dead {
            self.by_id.remove(id);
            self.id_by_hash.remove(hash);
        }
        Ok(dead.len() as u64)
    }
}
