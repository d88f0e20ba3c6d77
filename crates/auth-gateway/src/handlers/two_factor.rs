//! Two-factor enrolment handlers

use actix_web::{web, HttpResponse};
use shared::clock::SharedClock;

use crate::error::AuthError;
use crate::handlers::helpers::validate_request;
use crate::middleware::AuthenticatedUser;
use crate::models::{ConfirmTwoFactorRequest, EnrollTwoFactorRequest};
use crate::services::TwoFactorService;

/// Start TOTP enrolment; the secret is only ever returned here
///
/// POST /api/v1/auth/2fa/enroll
///
/// The body is optional until 2FA is enabled. Replacing an active secret
/// needs `{"code": ...}` with a current TOTP or backup code.
pub async fn enroll(
    user: AuthenticatedUser,
    two_factor: web::Data<TwoFactorService>,
    clock: web::Data<SharedClock>,
    body: Option<web::Json<EnrollTwoFactorRequest>>,
) -> Result<HttpResponse, AuthError> {
    let current_code = body.and_then(|b| b.into_inner().code);
    let response = two_factor
        .begin_enrollment(&user.user_id, current_code.as_deref(), clock.now())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Confirm enrolment with a code from the authenticator; returns backup codes once
///
/// POST /api/v1/auth/2fa/confirm
pub async fn confirm(
    user: AuthenticatedUser,
    two_factor: web::Data<TwoFactorService>,
    clock: web::Data<SharedClock>,
    body: web::Json<ConfirmTwoFactorRequest>,
) -> Result<HttpResponse, AuthError> {
    validate_request(&*body)?;

    let response = two_factor
        .confirm_enrollment(&user.user_id, &body.code, clock.now())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}
