//! Common Handler Helpers
//!
//! - [`validate_request`] - Validate a request body or fail with `validation_error`
//! - [`client_context`] - Client IP and user agent for a request
//! - [`json_config`] - JSON extractor whose errors use the standard error body
//! - [`parse_json_body`] - Same rules for handlers that take the raw body

use actix_web::{error::JsonPayloadError, web, HttpRequest};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::AuthError;
use crate::middleware::extract_ip;
use crate::services::ClientContext;

/// Longest user agent kept for audit records
const MAX_USER_AGENT_LEN: usize = 512;

/// Maximum JSON body size accepted by the auth endpoints
const MAX_JSON_BYTES: usize = 16 * 1024;

pub fn validate_request<T: Validate>(req: &T) -> Result<(), AuthError> {
    req.validate()
        .map_err(|e| AuthError::validation(format!("Validation failed: {}", e)))
}

/// Where the request came from, as recorded with sessions and login attempts
pub fn client_context(req: &HttpRequest) -> ClientContext {
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());

    ClientContext::new(extract_ip(req), user_agent)
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err: JsonPayloadError, _req| {
            AuthError::validation(format!("Invalid request body: {}", err)).into()
        })
}

pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AuthError> {
    if body.len() > MAX_JSON_BYTES {
        return Err(AuthError::validation("Invalid request body: payload too large"));
    }
    serde_json::from_slice(body)
        .map_err(|e| AuthError::validation(format!("Invalid request body: {}", e)))
}
