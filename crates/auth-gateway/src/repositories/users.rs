//! Credential store
//!
//! The gateway only reads accounts (plus the few columns login and 2FA
//! enrolment write). Account provisioning happens elsewhere.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shared::{AccountStatus, DbPool, Role, UserCredentials};
use sqlx::FromRow;
use std::sync::Arc;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up an account by username or email (case-insensitive)
    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<UserCredentials>>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserCredentials>>;

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Store a new pending secret; disables 2FA until it is confirmed
    async fn set_totp_secret(&self, user_id: &str, secret: &str) -> Result<()>;

    /// Mark the stored secret as confirmed
    async fn enable_totp(&self, user_id: &str) -> Result<()>;
}

/// Row shape of the `users` table
#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    status: String,
    totp_enabled: bool,
    totp_secret: Option<String>,
    last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for UserCredentials {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| anyhow!("User {} has invalid role: {}", row.id, e))?;
        let status: AccountStatus = row
            .status
            .parse()
            .map_err(|e| anyhow!("User {} has invalid status: {}", row.id, e))?;

        Ok(UserCredentials {
            id: row.id,
            username: row.username,
            email: row.email,
            role,
            status,
            password_hash: row.password_hash,
            totp_enabled: row.totp_enabled,
            totp_secret: row.totp_secret,
            last_login_at: row.last_login_at,
        })
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, status, \
                            totp_enabled, totp_secret, last_login_at";

/// PostgreSQL credential store
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: DbPool,
}

impl PgCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1) LIMIT 1",
            USER_COLUMNS
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find user by identifier")?;

        row.map(UserCredentials::try_from).transpose()
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find user by ID")?;

        row.map(UserCredentials::try_from).transpose()
    }

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = $1
            WHERE id = $2
            "#,
        )
        .bind(at)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to update last login")?;

        Ok(())
    }

    async fn set_totp_secret(&self, user_id: &str, secret: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_secret = $1, totp_enabled = FALSE, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(secret)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to store TOTP secret")?;

        Ok(())
    }

    async fn enable_totp(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_enabled = TRUE, updated_at = NOW()
            WHERE id = $1 AND totp_secret IS NOT NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to enable TOTP")?;

        Ok(())
    }
}

/// In-memory credential store for single-instance deployments and tests
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    users: Arc<DashMap<String, UserCredentials>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account
    pub fn insert(&self, user: UserCredentials) {
        self.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<UserCredentials>> {
        Ok(self
            .users
            .iter()
            .find(|u| {
                u.username.eq_ignore_ascii_case(identifier) || u.email.eq_ignore_ascii_case(identifier)
            })
            .map(|u| u.value().clone()))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserCredentials>> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn set_totp_secret(&self, user_id: &str, secret: &str) -> Result<()> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("User {} not found", user_id))?;
        user.totp_secret = Some(secret.to_string());
        user.totp_enabled = false;
        Ok(())
    }

    async fn enable_totp(&self, user_id: &str) -> Result<()> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("User {} not found", user_id))?;
        if user.totp_secret.is_some() {
            user.totp_enabled = true;
        }
        Ok(())
    }
}
