//! Authentication DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Role, UserCredentials};
use std::fmt;
use validator::Validate;

/// Login request
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(alias = "username", alias = "email")]
    #[validate(length(min = 1, max = 255))]
    pub username_or_email: String,

    #[validate(length(min = 1, max = 1024))]
    pub password: String,

    /// TOTP code or backup code
    #[serde(default, alias = "totp_code")]
    #[validate(length(max = 32))]
    pub two_factor_code: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username_or_email", &self.username_or_email)
            .field("password", &"[REDACTED]")
            .field("two_factor_code", &self.two_factor_code.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Refresh or logout request
#[derive(Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, max = 512))]
    pub refresh_token: String,
}

impl fmt::Debug for RefreshTokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenRequest")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Access and refresh token pair
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserSummary,
}

/// User summary (safe for API, without hash or secret)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub two_factor_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&UserCredentials> for UserSummary {
    fn from(user: &UserCredentials) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            two_factor_enabled: user.totp_enabled,
            last_login_at: user.last_login_at,
        }
    }
}

/// What a signed JWT stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    TwoFactorChallenge,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub role: Role,
    pub typ: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// TOTP enrolment start
#[derive(Clone, Serialize, Deserialize)]
pub struct TwoFactorEnrollResponse {
    /// Base32 secret for manual entry
    pub secret: String,
    /// `otpauth://` URI for QR rendering
    pub provisioning_uri: String,
}

impl fmt::Debug for TwoFactorEnrollResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoFactorEnrollResponse")
            .field("secret", &"[REDACTED]")
            .field("provisioning_uri", &"[REDACTED]")
            .finish()
    }
}

/// Optional body of an enrolment request
#[derive(Deserialize)]
pub struct EnrollTwoFactorRequest {
    /// Current TOTP or backup code; required when 2FA is already enabled
    #[serde(default)]
    pub code: Option<String>,
}

/// TOTP enrolment confirmation
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmTwoFactorRequest {
    #[validate(length(min = 6, max = 16))]
    pub code: String,
}

/// Backup codes, shown exactly once
#[derive(Clone, Serialize, Deserialize)]
pub struct TwoFactorConfirmResponse {
    pub enabled: bool,
    pub backup_codes: Vec<String>,
}

impl fmt::Debug for TwoFactorConfirmResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoFactorConfirmResponse")
            .field("enabled", &self.enabled)
            .field("backup_codes", &format!("[{} REDACTED]", self.backup_codes.len()))
            .finish()
    }
}

/// One currently blocked client identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedIdentity {
    pub identity: String,
    /// Seconds until the block lifts
    pub retry_after: u64,
    pub blocked_until: DateTime<Utc>,
}
