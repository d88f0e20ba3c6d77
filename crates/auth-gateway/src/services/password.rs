//! Password hashing (Argon2id)
//!
//! Verification runs against a pre-computed dummy hash when the account does
//! not exist, so unknown identifiers cost the same as wrong passwords.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use shared::config::PasswordHashConfig;
use tracing::warn;

use crate::error::{AuthError, AuthResult};

const DUMMY_PASSWORD: &str = "dummy-password-for-timing-equalisation";

/// Slow, salted password hash
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> AuthResult<String>;

    /// Constant-time check; a malformed stored hash is a mismatch
    fn verify(&self, password: &str, hash: &str) -> bool;

    /// Burn the same work as a real verification
    fn dummy_verify(&self);
}

#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl Argon2Hasher {
    pub fn new(config: &PasswordHashConfig) -> AuthResult<Self> {
        let params = Params::new(
            config.memory_kib.unwrap_or(Params::DEFAULT_M_COST),
            config.iterations.unwrap_or(Params::DEFAULT_T_COST),
            Params::DEFAULT_P_COST,
            None,
        )
        .map_err(|e| AuthError::internal(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(DUMMY_PASSWORD.as_bytes(), &salt)
            .map_err(|e| AuthError::internal(format!("Failed to pre-compute dummy hash: {}", e)))?
            .to_string();

        Ok(Self { argon2, dummy_hash })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::internal(format!("Failed to hash password: {}", e)))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Stored password hash is malformed");
                return false;
            }
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn dummy_verify(&self) {
        let _ = self.verify(DUMMY_PASSWORD, &self.dummy_hash);
    }
}
