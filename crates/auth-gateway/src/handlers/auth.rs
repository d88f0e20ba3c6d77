//! Authentication handlers

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::error::AuthError;
use crate::handlers::helpers::{client_context, parse_json_body, validate_request};
use crate::middleware::rate_limit_headers;
use crate::models::{LoginRequest, RefreshTokenRequest, SuccessResponse};
use crate::services::{LoginService, TokenService};

/// Log in with username or email and password (plus second factor if enabled)
///
/// POST /api/v1/auth/login
///
/// Rate-limit headers are attached whatever the outcome. The body is parsed
/// here but rejected only after the rate check, so malformed bodies spend
/// quota too. The login runs as its own task so a client disconnecting
/// mid-request cannot cancel the attempt bookkeeping.
pub async fn login(
    req_http: HttpRequest,
    service: web::Data<LoginService>,
    body: web::Bytes,
) -> HttpResponse {
    let ctx = client_context(&req_http);
    let request = parse_json_body::<LoginRequest>(&body);
    let service = service.into_inner();

    let outcome = match actix_web::rt::spawn(async move { service.login_or_reject(request, &ctx).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Login task failed");
            return AuthError::internal("Login task failed").error_response();
        }
    };

    let mut response = match outcome.result {
        Ok(auth) => HttpResponse::Ok().json(auth),
        Err(e) => e.error_response(),
    };

    let headers = response.headers_mut();
    for (name, value) in rate_limit_headers(&outcome.rate_limit) {
        headers.insert(name, value);
    }
    response
}

/// Exchange a refresh token for a new token pair
///
/// POST /api/v1/auth/refresh
pub async fn refresh(
    req_http: HttpRequest,
    tokens: web::Data<TokenService>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, AuthError> {
    validate_request(&*body)?;

    let pair = tokens
        .refresh(&body.refresh_token, &client_context(&req_http))
        .await?;
    Ok(HttpResponse::Ok().json(pair))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

/// Revoke a refresh token
///
/// POST /api/v1/auth/logout
pub async fn logout(
    tokens: web::Data<TokenService>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, AuthError> {
    validate_request(&*body)?;

    let revoked = tokens.revoke(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::new(LogoutResponse { revoked })))
}
