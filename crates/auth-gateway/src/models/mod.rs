//! Data Transfer Objects (DTOs) for API requests and responses

pub mod auth;
pub mod common;

// Re-exports
pub use auth::*;
pub use common::*;
