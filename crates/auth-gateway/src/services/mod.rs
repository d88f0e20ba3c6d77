//! Business logic services for the gateway
//!
//! Services encapsulate the authentication and abuse-prevention logic,
//! separate from HTTP handlers and storage.

pub mod attempt_tracker;
pub mod backup_codes;
pub mod login_service;
pub mod password;
pub mod security_events;
pub mod token_service;
pub mod totp;
pub mod two_factor;

pub use attempt_tracker::{AttemptOutcome, AttemptTracker, BlockStatus, ClientIdentity};
pub use login_service::{LoginOutcome, LoginService, LoginStage};
pub use password::{Argon2Hasher, CredentialHasher};
pub use security_events::{
    InMemoryEventSink, SecurityEvent, SecurityEventSink, SharedEventSink, TracingEventSink,
};
pub use token_service::{hash_refresh_token, ClientContext, TokenService};
pub use totp::{TotpSecret, TotpVerifier};
pub use two_factor::{SecondFactor, TwoFactorService};
