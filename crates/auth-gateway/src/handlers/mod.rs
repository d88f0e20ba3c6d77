//! Request handlers for API endpoints

pub mod admin;
pub mod auth;
pub mod health;
pub mod helpers;
pub mod two_factor;

// Re-export commonly used handlers
pub use admin::{list_blocked, unblock};
pub use auth::{login, logout, refresh};
pub use health::{health_check, metrics};
