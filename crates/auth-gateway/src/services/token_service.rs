//! Token Issuer
//!
//! Access tokens are HS256 JWTs verified statelessly. Refresh tokens are
//! opaque (`urt_` + 32 random bytes, URL-safe base64) and stored only as
//! SHA-256 digests so they can be revoked server-side.
//!
//! # Rotation
//!
//! Every refresh revokes the presented token and stores its replacement in
//! one repository call. Presenting a token that was already rotated or
//! revoked is treated as theft: every refresh token of that subject is
//! revoked and a security event is recorded.
//!
//! The account is re-read on every refresh: a missing or inactive account
//! ends the whole token family, and the new access token carries the
//! account's current role rather than the one it had at login.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use shared::clock::{to_delta, SharedClock};
use shared::config::TokenConfig;
use shared::Role;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::models::{Claims, TokenPair, TokenType};
use crate::repositories::{CredentialStore, NewRefreshToken, RefreshTokenStore};
use crate::services::security_events::{SecurityEvent, SharedEventSink};

/// Token prefix for user refresh tokens
const TOKEN_PREFIX: &str = "urt_";

/// 256 bits of entropy
const TOKEN_ENTROPY_BYTES: usize = 32;

/// Prefix plus 43 base64url characters
const TOKEN_LENGTH: usize = 47;

/// Where a session was opened from; stored alongside the refresh token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn new(ip: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent,
        }
    }
}

fn generate_refresh_token() -> String {
    let mut random_bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut random_bytes);
    format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(random_bytes))
}

/// SHA-256 hex digest used as the storage key
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token.starts_with(TOKEN_PREFIX)
        && URL_SAFE_NO_PAD.decode(&token[TOKEN_PREFIX.len()..]).is_ok()
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat => AuthError::TokenInvalid,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenMalformed,
    }
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    store: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn CredentialStore>,
    clock: SharedClock,
    events: SharedEventSink,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(
        jwt_secret: &str,
        config: TokenConfig,
        store: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn CredentialStore>,
        clock: SharedClock,
        events: SharedEventSink,
    ) -> Self {
        // Expiry is checked against the injected clock, not the system time
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            store,
            users,
            clock,
            events,
            config,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    fn sign(&self, subject: &str, role: Role, typ: TokenType, ttl: std::time::Duration) -> AuthResult<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            role,
            typ,
            iat: now.timestamp(),
            exp: (now + to_delta(ttl)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::internal(format!("Failed to generate JWT: {}", e)))
    }

    fn decode_claims(&self, token: &str) -> AuthResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(map_jwt_error)?;
        if data.claims.exp <= self.clock.now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(data.claims)
    }

    /// Mint an access token and a stored refresh token
    pub async fn issue(&self, subject: &str, role: Role, ctx: &ClientContext) -> AuthResult<TokenPair> {
        let access_token = self.sign(subject, role, TokenType::Access, self.config.access_token_ttl)?;
        let refresh_token = generate_refresh_token();

        self.store
            .insert(self.new_record(subject, role, &refresh_token, ctx))
            .await?;

        Ok(self.pair(access_token, refresh_token))
    }

    /// Short-lived reference handed back with `TwoFactorRequired`.
    ///
    /// It only tells the client which account still owes a second factor.
    /// No endpoint redeems it: the client repeats the login with the password
    /// and the code, and [`verify`](Self::verify) rejects it as an access token.
    pub fn issue_challenge(&self, subject: &str, role: Role) -> AuthResult<String> {
        self.sign(subject, role, TokenType::TwoFactorChallenge, self.config.challenge_ttl)
    }

    /// Verify an access token's signature, algorithm, expiry and type
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.decode_claims(token)?;
        if claims.typ != TokenType::Access {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair, rotating the refresh token
    pub async fn refresh(&self, refresh_token: &str, ctx: &ClientContext) -> AuthResult<TokenPair> {
        if !is_well_formed(refresh_token) {
            return Err(AuthError::TokenMalformed);
        }

        let now = self.clock.now();
        let record = self
            .store
            .find_by_hash(&hash_refresh_token(refresh_token))
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if record.is_revoked() {
            self.revoke_family(&record.user_id, now).await?;
            return Err(AuthError::TokenRevoked);
        }

        if record.expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        let user = self.users.find_user_by_id(&record.user_id).await?;
        let Some(user) = user.filter(|u| u.is_active()) else {
            let revoked = self.store.revoke_all_for_user(&record.user_id, now).await?;
            warn!(user_id = %record.user_id, revoked = revoked, "Refresh refused for missing or inactive account");
            return Err(AuthError::TokenRevoked);
        };
        let role = user.role;

        let new_refresh = generate_refresh_token();
        let replacement = self.new_record(&record.user_id, role, &new_refresh, ctx);

        if !self.store.rotate(&record.id, replacement, now).await? {
            // Lost a race against a concurrent rotation of the same token
            return Err(AuthError::TokenRevoked);
        }

        debug!(user_id = %record.user_id, "Refresh token rotated");

        let access_token = self.sign(&record.user_id, role, TokenType::Access, self.config.access_token_ttl)?;
        Ok(self.pair(access_token, new_refresh))
    }

    /// Revoke one refresh token (logout); false when it was unknown or already revoked
    pub async fn revoke(&self, refresh_token: &str) -> AuthResult<bool> {
        if !is_well_formed(refresh_token) {
            return Err(AuthError::TokenMalformed);
        }

        let Some(record) = self
            .store
            .find_by_hash(&hash_refresh_token(refresh_token))
            .await?
        else {
            return Ok(false);
        };

        Ok(self.store.revoke(&record.id, self.clock.now()).await?)
    }

    /// Revoke every refresh token of a subject (logout everywhere)
    pub async fn revoke_all(&self, subject: &str) -> AuthResult<u64> {
        Ok(self
            .store
            .revoke_all_for_user(subject, self.clock.now())
            .await?)
    }

    /// Delete refresh tokens that expired or were revoked before `cutoff`
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        Ok(self.store.cleanup_expired(cutoff).await?)
    }

    async fn revoke_family(&self, user_id: &str, now: DateTime<Utc>) -> AuthResult<()> {
        let revoked = self.store.revoke_all_for_user(user_id, now).await?;
        warn!(user_id = %user_id, revoked = revoked, "Revoked refresh token presented");
        metrics::counter!("refresh_token_reuse_total").increment(1);
        self.events.record(SecurityEvent::RefreshTokenReuse {
            user_id: user_id.to_string(),
            revoked,
        });
        Ok(())
    }

    fn new_record(&self, subject: &str, role: Role, raw: &str, ctx: &ClientContext) -> NewRefreshToken {
        let now = self.clock.now();
        NewRefreshToken {
            id: Uuid::new_v4().to_string(),
            user_id: subject.to_string(),
            token_hash: hash_refresh_token(raw),
            role: role.as_str().to_string(),
            expires_at: now + to_delta(self.config.refresh_token_ttl),
            user_agent: ctx.user_agent.clone(),
            ip_address: Some(ctx.ip.clone()),
            created_at: now,
        }
    }

    fn pair(&self, access_token: String, refresh_token: String) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl.as_secs() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryCredentialStore, InMemoryRefreshTokenStore};
    use crate::services::security_events::InMemoryEventSink;
    use shared::{AccountStatus, ManualClock, UserCredentials};
    use std::time::Duration;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long!!";

    struct Fixture {
        service: TokenService,
        clock: ManualClock,
        store: InMemoryRefreshTokenStore,
        users: InMemoryCredentialStore,
        events: InMemoryEventSink,
    }

    fn account(role: Role, status: AccountStatus) -> UserCredentials {
        UserCredentials {
            id: "user-1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            role,
            status,
            password_hash: "unused".to_string(),
            totp_enabled: false,
            totp_secret: None,
            last_login_at: None,
        }
    }

    fn fixture_with_secret(secret: &str, clock: ManualClock, store: InMemoryRefreshTokenStore) -> TokenService {
        TokenService::new(
            secret,
            TokenConfig::default(),
            Arc::new(store),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(clock),
            Arc::new(InMemoryEventSink::new()),
        )
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let store = InMemoryRefreshTokenStore::new();
        let users = InMemoryCredentialStore::new();
        users.insert(account(Role::Reseller, AccountStatus::Active));
        let events = InMemoryEventSink::new();
        let service = TokenService::new(
            SECRET,
            TokenConfig::default(),
            Arc::new(store.clone()),
            Arc::new(users.clone()),
            Arc::new(clock.clone()),
            Arc::new(events.clone()),
        );
        Fixture {
            service,
            clock,
            store,
            users,
            events,
        }
    }

    fn ctx() -> ClientContext {
        ClientContext::new("1.2.3.4", Some("test-agent".to_string()))
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let f = fixture();
        let pair = f.service.issue("user-1", Role::Admin, &ctx()).await.unwrap();

        let claims = f.service.verify(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.typ, TokenType::Access);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(pair.expires_in, 3600);
        assert_eq!(pair.token_type, "Bearer");
        assert!(pair.refresh_token.starts_with("urt_"));
        assert_eq!(pair.refresh_token.len(), TOKEN_LENGTH);
        assert_eq!(f.store.active_count("user-1"), 1);
    }

    #[tokio::test]
    async fn test_access_token_expires() {
        let f = fixture();
        let pair = f.service.issue("user-1", Role::User, &ctx()).await.unwrap();

        f.clock.advance(Duration::from_secs(3599));
        assert!(f.service.verify(&pair.access_token).is_ok());

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.service.verify(&pair.access_token), Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_foreign_key_is_invalid_not_malformed() {
        let f = fixture();
        let other = fixture_with_secret(
            "a-completely-different-secret-of-32-bytes",
            f.clock.clone(),
            InMemoryRefreshTokenStore::new(),
        );
        let pair = other.issue("user-1", Role::User, &ctx()).await.unwrap();

        assert_eq!(f.service.verify(&pair.access_token), Err(AuthError::TokenInvalid));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let f = fixture();
        assert_eq!(f.service.verify("not-a-jwt"), Err(AuthError::TokenMalformed));
        assert_eq!(f.service.verify(""), Err(AuthError::TokenMalformed));
    }

    #[test]
    fn test_other_algorithm_is_invalid() {
        let f = fixture();
        let claims = Claims {
            sub: "user-1".to_string(),
            role: Role::Admin,
            typ: TokenType::Access,
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            jti: "j".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(f.service.verify(&token), Err(AuthError::TokenInvalid));
    }

    #[test]
    fn test_challenge_token_is_not_an_access_token() {
        let f = fixture();
        let challenge = f.service.issue_challenge("user-1", Role::User).unwrap();
        assert_eq!(f.service.verify(&challenge), Err(AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn test_refresh_rotates() {
        let f = fixture();
        let first = f.service.issue("user-1", Role::Reseller, &ctx()).await.unwrap();

        let second = f.service.refresh(&first.refresh_token, &ctx()).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(f.service.verify(&second.access_token).unwrap().role, Role::Reseller);
        assert_eq!(f.store.active_count("user-1"), 1);
    }

    #[tokio::test]
    async fn test_reused_refresh_token_revokes_family() {
        let f = fixture();
        let first = f.service.issue("user-1", Role::User, &ctx()).await.unwrap();
        let second = f.service.refresh(&first.refresh_token, &ctx()).await.unwrap();

        assert_eq!(
            f.service.refresh(&first.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenRevoked
        );
        // The legitimate successor is gone too
        assert_eq!(
            f.service.refresh(&second.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenRevoked
        );
        assert_eq!(f.store.active_count("user-1"), 0);
        assert!(matches!(
            f.events.events().first(),
            Some(SecurityEvent::RefreshTokenReuse { user_id, revoked: 1 }) if user_id == "user-1"
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_expiry() {
        let f = fixture();
        let pair = f.service.issue("user-1", Role::User, &ctx()).await.unwrap();

        f.clock.advance(Duration::from_secs(30 * 24 * 3600));
        assert_eq!(
            f.service.refresh(&pair.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_refresh_tokens() {
        let f = fixture();

        assert_eq!(
            f.service.refresh("urt_short", &ctx()).await.unwrap_err(),
            AuthError::TokenMalformed
        );
        assert_eq!(
            f.service.refresh(&generate_refresh_token(), &ctx()).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn test_revoke_single_and_all() {
        let f = fixture();
        let a = f.service.issue("user-1", Role::User, &ctx()).await.unwrap();
        let b = f.service.issue("user-1", Role::User, &ctx()).await.unwrap();

        assert!(f.service.revoke(&a.refresh_token).await.unwrap());
        assert!(!f.service.revoke(&a.refresh_token).await.unwrap());
        assert_eq!(f.store.active_count("user-1"), 1);

        assert_eq!(f.service.revoke_all("user-1").await.unwrap(), 1);
        assert_eq!(
            f.service.refresh(&b.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenRevoked
        );
    }

    #[tokio::test]
    async fn test_refresh_refused_once_account_is_suspended() {
        let f = fixture();
        let first = f.service.issue("user-1", Role::Reseller, &ctx()).await.unwrap();
        let second = f.service.issue("user-1", Role::Reseller, &ctx()).await.unwrap();

        f.users.insert(account(Role::Reseller, AccountStatus::Suspended));

        assert_eq!(
            f.service.refresh(&first.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenRevoked
        );
        assert_eq!(f.store.active_count("user-1"), 0);

        // Reactivation does not bring the old sessions back
        f.users.insert(account(Role::Reseller, AccountStatus::Active));
        assert_eq!(
            f.service.refresh(&second.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenRevoked
        );
    }

    #[tokio::test]
    async fn test_refresh_refused_for_deleted_account() {
        let f = fixture();
        let pair = f.service.issue("ghost", Role::User, &ctx()).await.unwrap();

        assert_eq!(
            f.service.refresh(&pair.refresh_token, &ctx()).await.unwrap_err(),
            AuthError::TokenRevoked
        );
        assert_eq!(f.store.active_count("ghost"), 0);
    }

    #[tokio::test]
    async fn test_refresh_signs_current_role() {
        let f = fixture();
        f.users.insert(account(Role::Admin, AccountStatus::Active));
        let first = f.service.issue("user-1", Role::Admin, &ctx()).await.unwrap();

        f.users.insert(account(Role::User, AccountStatus::Active));
        let second = f.service.refresh(&first.refresh_token, &ctx()).await.unwrap();

        assert_eq!(f.service.verify(&second.access_token).unwrap().role, Role::User);
    }
}
