//! Gateway error taxonomy
//!
//! Every failure a caller can observe is one of these kinds, each with a
//! stable `error` code and HTTP status. Infrastructure failures collapse into
//! [`AuthError::Internal`] so responses never reveal internal topology; the
//! detail is logged where the error is created.

use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Result alias used across services
pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Too many requests in the current window
    #[error("Too many requests")]
    RateLimited { retry_after: u64 },

    /// Brute-force threshold tripped for this client
    #[error("Too many failed login attempts")]
    Blocked { retry_after: u64 },

    /// Unknown identifier, wrong password or disabled account (indistinguishable)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Password accepted, second factor missing
    #[error("Two-factor authentication required")]
    TwoFactorRequired { challenge: String },

    /// Second factor supplied but wrong
    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("Token expired")]
    TokenExpired,

    /// Signature, algorithm or token type rejected
    #[error("Invalid token")]
    TokenInvalid,

    /// Not a structurally valid token
    #[error("Malformed token")]
    TokenMalformed,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Message is logged, never sent to the client
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::Blocked { .. } => "blocked",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::TwoFactorRequired { .. } => "two_factor_required",
            AuthError::InvalidTwoFactorCode => "invalid_two_factor_code",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid => "token_invalid",
            AuthError::TokenMalformed => "token_malformed",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::Unauthenticated => "unauthorized",
            AuthError::Forbidden => "forbidden",
            AuthError::Validation(_) => "validation_error",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Seconds the client should wait, for the kinds that carry one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AuthError::RateLimited { retry_after } | AuthError::Blocked { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::Internal(_) => "Service temporarily unavailable".to_string(),
            AuthError::RateLimited { retry_after } => {
                format!("Too many requests. Try again in {} seconds", retry_after)
            }
            AuthError::Blocked { retry_after } => format!(
                "Too many failed login attempts. Try again in {} seconds",
                retry_after
            ),
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AuthError::RateLimited { retry_after } | AuthError::Blocked { retry_after } => {
                Some(serde_json::json!({ "retry_after": retry_after }))
            }
            AuthError::TwoFactorRequired { challenge } => {
                Some(serde_json::json!({ "challenge": challenge }))
            }
            _ => None,
        }
    }
}

impl From<shared::Error> for AuthError {
    fn from(err: shared::Error) -> Self {
        match err {
            shared::Error::Validation(msg) => AuthError::Validation(msg),
            other => AuthError::Internal(other.to_string()),
        }
    }
}

/// Repository failures carry their context chain into the log line
impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Internal(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Internal(format!("Database error: {}", err))
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Blocked { .. } => StatusCode::LOCKED,
            AuthError::InvalidCredentials
            | AuthError::TwoFactorRequired { .. }
            | AuthError::InvalidTwoFactorCode
            | AuthError::TokenExpired
            | AuthError::TokenInvalid
            | AuthError::TokenMalformed
            | AuthError::TokenRevoked
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AuthError::Internal(detail) = self {
            error!(error = %detail, "Request failed with internal error");
        }

        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.public_message(),
            details: self.details(),
        };

        let mut builder = HttpResponse::build(self.status_code());
        if let Some(secs) = self.retry_after() {
            builder.insert_header((header::RETRY_AFTER, secs.to_string()));
        }
        builder.json(body)
    }
}
