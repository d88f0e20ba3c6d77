//! Bearer token extractors
//!
//! [`AuthenticatedUser`] verifies the `Authorization: Bearer` access token
//! with the app's [`TokenService`]. [`AdminUser`] additionally requires the
//! `admin` role.

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use shared::Role;
use std::future::{ready, Ready};
use tracing::{debug, error};

use crate::error::AuthError;
use crate::models::Claims;
use crate::services::TokenService;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: Role,
    pub claims: Claims,
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AuthError> {
    let Some(tokens) = req.app_data::<web::Data<TokenService>>() else {
        error!("TokenService missing from app data");
        return Err(AuthError::internal("Token service not configured"));
    };

    let token = bearer_token(req).ok_or(AuthError::Unauthenticated)?;
    let claims = tokens.verify(token).inspect_err(|e| {
        debug!(error = %e, path = %req.path(), "Access token rejected");
    })?;

    Ok(AuthenticatedUser {
        user_id: claims.sub.clone(),
        role: claims.role,
        claims,
    })
}

impl FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

/// Authenticated user holding the `admin` role
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequest for AdminUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req).and_then(|user| {
            if user.role == Role::Admin {
                Ok(AdminUser(user))
            } else {
                Err(AuthError::Forbidden)
            }
        }))
    }
}
