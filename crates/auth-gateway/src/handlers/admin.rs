//! Operator endpoints for brute-force blocks (admin role)

use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::info;

use crate::error::AuthError;
use crate::middleware::AdminUser;
use crate::models::{BlockedIdentity, SuccessResponse};
use crate::services::{AttemptTracker, ClientIdentity};

#[derive(Debug, Serialize)]
pub struct BlockedList {
    pub blocked: Vec<BlockedIdentity>,
    pub total: usize,
}

/// GET /api/v1/admin/blocked
pub async fn list_blocked(
    _admin: AdminUser,
    tracker: web::Data<AttemptTracker>,
) -> Result<HttpResponse, AuthError> {
    let blocked = tracker.list_blocked().await?;
    let total = blocked.len();
    Ok(HttpResponse::Ok().json(SuccessResponse::new(BlockedList { blocked, total })))
}

/// Lift a block; `identity` is `ip:{address}` or a bare address
///
/// DELETE /api/v1/admin/blocked/{identity}
pub async fn unblock(
    admin: AdminUser,
    tracker: web::Data<AttemptTracker>,
    path: web::Path<String>,
) -> Result<HttpResponse, AuthError> {
    let identity = ClientIdentity::parse(&path.into_inner())?;
    tracker.unblock(&identity, &admin.0.user_id).await?;

    info!(identity = %identity, operator = %admin.0.user_id, "Identity unblocked");
    Ok(HttpResponse::NoContent().finish())
}
