//! TOTP enrolment and second-factor checks
//!
//! Enrolment is two-step. `begin_enrollment` stores a new secret with 2FA
//! disabled (dropping any previous secret and backup codes) and returns the
//! provisioning data once. `confirm_enrollment` proves the authenticator works,
//! enables 2FA and hands out fresh backup codes, again exactly once.
//!
//! Once 2FA is enabled, starting a new enrolment needs a current TOTP or
//! backup code, so an access token alone cannot strip the second factor.

use chrono::{DateTime, Utc};
use shared::UserCredentials;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::models::{TwoFactorConfirmResponse, TwoFactorEnrollResponse};
use crate::repositories::{BackupCodeStore, CredentialStore};
use crate::services::backup_codes::{
    format_backup_code, generate_backup_codes, hash_backup_code, looks_like_backup_code,
    BACKUP_CODE_COUNT, BACKUP_CODE_LENGTH,
};
use crate::services::security_events::{SecurityEvent, SharedEventSink};
use crate::services::totp::{TotpSecret, TotpVerifier};

/// Which factor satisfied the check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactor {
    Totp,
    BackupCode,
}

pub struct TwoFactorService {
    verifier: TotpVerifier,
    users: Arc<dyn CredentialStore>,
    backup_codes: Arc<dyn BackupCodeStore>,
    events: SharedEventSink,
}

impl TwoFactorService {
    pub fn new(
        verifier: TotpVerifier,
        users: Arc<dyn CredentialStore>,
        backup_codes: Arc<dyn BackupCodeStore>,
        events: SharedEventSink,
    ) -> Self {
        Self {
            verifier,
            users,
            backup_codes,
            events,
        }
    }

    pub fn verifier(&self) -> &TotpVerifier {
        &self.verifier
    }

    pub async fn begin_enrollment(
        &self,
        user_id: &str,
        current_code: Option<&str>,
        at: DateTime<Utc>,
    ) -> AuthResult<TwoFactorEnrollResponse> {
        let user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if user.totp_enabled {
            let code = current_code.map(str::trim).filter(|c| !c.is_empty());
            let verified = match code {
                Some(code) => self.verify_second_factor(&user, code, at).await?,
                None => None,
            };
            if verified.is_none() {
                warn!(user_id = %user.id, "Re-enrolment refused without a valid second factor");
                return Err(AuthError::InvalidTwoFactorCode);
            }
        }

        let secret = self.verifier.generate_secret();
        let provisioning_uri = self.verifier.provisioning_uri(&secret, &user.email)?;

        self.users.set_totp_secret(&user.id, secret.expose()).await?;
        self.backup_codes.clear(&user.id).await?;

        debug!(user_id = %user.id, "Two-factor enrolment started");

        Ok(TwoFactorEnrollResponse {
            secret: secret.expose().to_string(),
            provisioning_uri,
        })
    }

    pub async fn confirm_enrollment(
        &self,
        user_id: &str,
        code: &str,
        at: DateTime<Utc>,
    ) -> AuthResult<TwoFactorConfirmResponse> {
        let user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if user.totp_enabled {
            return Err(AuthError::validation("Two-factor authentication is already enabled"));
        }
        let secret = user
            .totp_secret
            .as_deref()
            .map(TotpSecret::from_base32)
            .ok_or_else(|| AuthError::validation("No two-factor enrolment in progress"))?;

        if !self.verifier.validate(&secret, code, at) {
            return Err(AuthError::InvalidTwoFactorCode);
        }

        let codes = generate_backup_codes(BACKUP_CODE_COUNT, BACKUP_CODE_LENGTH);
        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();

        self.backup_codes.replace_all(&user.id, &hashes).await?;
        self.users.enable_totp(&user.id).await?;

        info!(user_id = %user.id, "Two-factor authentication enabled");
        self.events.record(SecurityEvent::TwoFactorEnabled {
            user_id: user.id.clone(),
        });

        Ok(TwoFactorConfirmResponse {
            enabled: true,
            backup_codes: codes.iter().map(|c| format_backup_code(c)).collect(),
        })
    }

    /// Check a TOTP code, falling back to consuming a backup code.
    ///
    /// Returns `None` when neither matches. A backup code that matches is
    /// removed in the same store call, so it succeeds at most once.
    pub async fn verify_second_factor(
        &self,
        user: &UserCredentials,
        code: &str,
        at: DateTime<Utc>,
    ) -> AuthResult<Option<SecondFactor>> {
        let Some(secret) = user.totp_secret.as_deref().map(TotpSecret::from_base32) else {
            return Ok(None);
        };

        if self.verifier.validate(&secret, code, at) {
            return Ok(Some(SecondFactor::Totp));
        }

        if looks_like_backup_code(code)
            && self
                .backup_codes
                .consume(&user.id, &hash_backup_code(code))
                .await?
        {
            info!(user_id = %user.id, "Backup code used");
            return Ok(Some(SecondFactor::BackupCode));
        }

        Ok(None)
    }

    pub async fn remaining_backup_codes(&self, user_id: &str) -> AuthResult<usize> {
        Ok(self.backup_codes.remaining(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryBackupCodeStore, InMemoryCredentialStore};
    use crate::services::security_events::InMemoryEventSink;
    use shared::{AccountStatus, Role};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn setup() -> (TwoFactorService, InMemoryCredentialStore, InMemoryEventSink) {
        let users = InMemoryCredentialStore::new();
        users.insert(UserCredentials {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            role: Role::User,
            status: AccountStatus::Active,
            password_hash: "unused".to_string(),
            totp_enabled: false,
            totp_secret: None,
            last_login_at: None,
        });
        let events = InMemoryEventSink::new();
        let service = TwoFactorService::new(
            TotpVerifier::new("AdminiSoftware"),
            Arc::new(users.clone()),
            Arc::new(InMemoryBackupCodeStore::new()),
            Arc::new(events.clone()),
        );
        (service, users, events)
    }

    #[tokio::test]
    async fn test_enrolment_flow() {
        let (service, users, events) = setup();
        let now = at(1_700_000_000);

        let enroll = service.begin_enrollment("u1", None, now).await.unwrap();
        assert!(enroll.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(!users.find_user_by_id("u1").await.unwrap().unwrap().totp_enabled);

        let secret = TotpSecret::from_base32(enroll.secret.clone());
        let code = service.verifier().generate(&secret, now).unwrap();

        assert_eq!(
            service.confirm_enrollment("u1", "000000x", now).await.unwrap_err(),
            AuthError::InvalidTwoFactorCode
        );

        let confirmed = service.confirm_enrollment("u1", &code, now).await.unwrap();
        assert!(confirmed.enabled);
        assert_eq!(confirmed.backup_codes.len(), 10);
        assert_eq!(service.remaining_backup_codes("u1").await.unwrap(), 10);

        let user = users.find_user_by_id("u1").await.unwrap().unwrap();
        assert!(user.totp_enabled);
        assert_eq!(user.totp_secret.as_deref(), Some(enroll.secret.as_str()));
        assert_eq!(
            events.events(),
            vec![SecurityEvent::TwoFactorEnabled {
                user_id: "u1".to_string()
            }]
        );

        // Cannot confirm twice
        assert!(matches!(
            service.confirm_enrollment("u1", &code, now).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_re_enrolment_invalidates_backup_codes() {
        let (service, users, _) = setup();
        let now = at(1_700_000_000);

        let enroll = service.begin_enrollment("u1", None, now).await.unwrap();
        let code = service
            .verifier()
            .generate(&TotpSecret::from_base32(enroll.secret), now)
            .unwrap();
        let confirmed = service.confirm_enrollment("u1", &code, now).await.unwrap();

        service.begin_enrollment("u1", Some(&code), now).await.unwrap();
        assert_eq!(service.remaining_backup_codes("u1").await.unwrap(), 0);

        let user = users.find_user_by_id("u1").await.unwrap().unwrap();
        assert!(!user.totp_enabled);
        let outcome = service
            .verify_second_factor(&user, &confirmed.backup_codes[0], now)
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_backup_code_works_once() {
        let (service, users, _) = setup();
        let now = at(1_700_000_000);

        let enroll = service.begin_enrollment("u1", None, now).await.unwrap();
        let code = service
            .verifier()
            .generate(&TotpSecret::from_base32(enroll.secret), now)
            .unwrap();
        let confirmed = service.confirm_enrollment("u1", &code, now).await.unwrap();
        let user = users.find_user_by_id("u1").await.unwrap().unwrap();

        let backup = confirmed.backup_codes[3].to_lowercase();
        assert_eq!(
            service.verify_second_factor(&user, &backup, now).await.unwrap(),
            Some(SecondFactor::BackupCode)
        );
        assert_eq!(service.verify_second_factor(&user, &backup, now).await.unwrap(), None);
        assert_eq!(service.remaining_backup_codes("u1").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_unknown_user_cannot_enrol() {
        let (service, _, _) = setup();
        assert_eq!(
            service
                .begin_enrollment("ghost", None, at(1_700_000_000))
                .await
                .unwrap_err(),
            AuthError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_active_second_factor_guards_re_enrolment() {
        let (service, users, _) = setup();
        let now = at(1_700_000_000);

        let enroll = service.begin_enrollment("u1", None, now).await.unwrap();
        let secret = TotpSecret::from_base32(enroll.secret.clone());
        let code = service.verifier().generate(&secret, now).unwrap();
        let confirmed = service.confirm_enrollment("u1", &code, now).await.unwrap();

        for current in [None, Some(""), Some("000000")] {
            assert_eq!(
                service.begin_enrollment("u1", current, now).await.unwrap_err(),
                AuthError::InvalidTwoFactorCode
            );
        }

        // Nothing was reset by the refused attempts
        let user = users.find_user_by_id("u1").await.unwrap().unwrap();
        assert!(user.totp_enabled);
        assert_eq!(user.totp_secret.as_deref(), Some(enroll.secret.as_str()));
        assert_eq!(service.remaining_backup_codes("u1").await.unwrap(), 10);

        // A backup code is accepted in place of the authenticator
        let restarted = service
            .begin_enrollment("u1", Some(&confirmed.backup_codes[0]), now)
            .await
            .unwrap();
        assert_ne!(restarted.secret, enroll.secret);
    }
}
