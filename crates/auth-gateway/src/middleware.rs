//! Middleware and request extractors for the gateway

pub mod auth_extractor;
pub mod ip_extractor;
pub mod rate_limit;

pub use auth_extractor::{AdminUser, AuthenticatedUser};
pub use ip_extractor::{extract_ip, TrustedProxies};
pub use rate_limit::{rate_limit_headers, RouteRateLimit};
