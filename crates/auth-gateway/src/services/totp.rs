//! TOTP second-factor verification (RFC 6238, SHA-1, 6 digits, 30 s step)
//!
//! The verifier is stateless: it never stores secrets, only derives and checks
//! codes. Validation accepts the current step and one step either side.

use chrono::{DateTime, Utc};
use std::fmt;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

use crate::error::{AuthError, AuthResult};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECS: u64 = 30;

/// Base32-encoded shared secret (160 bits)
#[derive(Clone, PartialEq, Eq)]
pub struct TotpSecret(String);

impl TotpSecret {
    pub fn from_base32(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TotpSecret([REDACTED])")
    }
}

#[derive(Debug, Clone)]
pub struct TotpVerifier {
    issuer: String,
}

impl TotpVerifier {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Fresh random secret
    pub fn generate_secret(&self) -> TotpSecret {
        TotpSecret(Secret::generate_secret().to_encoded().to_string())
    }

    /// `otpauth://` URI for authenticator apps
    pub fn provisioning_uri(&self, secret: &TotpSecret, account: &str) -> AuthResult<String> {
        // the otpauth label cannot carry ':'
        let account = account.replace(':', "_");
        let totp = self
            .build(secret, account)
            .map_err(|e| AuthError::internal(format!("TOTP init error: {}", e)))?;
        Ok(totp.get_url())
    }

    /// Check `code` against `secret` at `at`.
    ///
    /// Malformed input (wrong length, non-digits, undecodable secret) is simply
    /// invalid. Spaces and dashes inside the code are ignored.
    pub fn validate(&self, secret: &TotpSecret, code: &str, at: DateTime<Utc>) -> bool {
        let code: String = code.chars().filter(|c| *c != ' ' && *c != '-').collect();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let Ok(time) = u64::try_from(at.timestamp()) else {
            return false;
        };

        match self.build(secret, "verify".to_string()) {
            Ok(totp) => totp.check(&code, time),
            Err(e) => {
                warn!(error = %e, "Stored TOTP secret could not be used");
                false
            }
        }
    }

    /// Code for the step containing `at`
    pub fn generate(&self, secret: &TotpSecret, at: DateTime<Utc>) -> AuthResult<String> {
        let time = u64::try_from(at.timestamp())
            .map_err(|_| AuthError::validation("Time before the Unix epoch"))?;
        let totp = self
            .build(secret, "generate".to_string())
            .map_err(|e| AuthError::internal(format!("TOTP init error: {}", e)))?;
        Ok(totp.generate(time))
    }

    fn build(&self, secret: &TotpSecret, account: String) -> Result<TOTP, String> {
        let bytes = Secret::Encoded(secret.0.clone())
            .to_bytes()
            .map_err(|e| format!("{:?}", e))?;

        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECS,
            bytes,
            Some(self.issuer.clone()),
            account,
        )
        .map_err(|e| e.to_string())
    }
}
