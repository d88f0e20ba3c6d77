//! Repository layer for persistent state
//!
//! Each store is a trait with a PostgreSQL and an in-memory implementation,
//! picked by the composition root.

pub mod backup_codes;
pub mod login_attempts;
pub mod refresh_tokens;
pub mod users;

// Re-exports
pub use backup_codes::{BackupCodeStore, InMemoryBackupCodeStore, PgBackupCodeStore};
pub use login_attempts::{AttemptLog, InMemoryAttemptLog, PgAttemptLog};
pub use refresh_tokens::{
    InMemoryRefreshTokenStore, NewRefreshToken, PgRefreshTokenStore, RefreshTokenRecord,
    RefreshTokenStore,
};
pub use users::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};
