//! Data models matching the PostgreSQL database schema

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account role carried in access tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Reseller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Reseller => "reseller",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "reseller" => Ok(Role::Reseller),
            "admin" => Ok(Role::Admin),
            other => Err(Error::validation(format!("Unknown role '{}'", other))),
        }
    }
}

/// Account lifecycle state; only `Active` accounts may log in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "suspended" => Ok(AccountStatus::Suspended),
            "deleted" => Ok(AccountStatus::Deleted),
            other => Err(Error::validation(format!("Unknown account status '{}'", other))),
        }
    }
}

/// What the gateway needs to know about an account to authenticate it
#[derive(Clone)]
pub struct UserCredentials {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub password_hash: String,
    pub totp_enabled: bool,
    /// Base32 TOTP secret, present once enrolment has begun
    pub totp_secret: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserCredentials {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

// Hash and secret are never printed
impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("status", &self.status)
            .field("password_hash", &"[REDACTED]")
            .field("totp_enabled", &self.totp_enabled)
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "[REDACTED]"))
            .field("last_login_at", &self.last_login_at)
            .finish()
    }
}

/// One row of the login audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptRecord {
    pub ip: String,
    pub username: String,
    pub success: bool,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
