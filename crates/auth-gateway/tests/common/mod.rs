//! Common test utilities for integration tests
//!
//! Builds the full gateway on in-memory backends with a [`ManualClock`], so
//! tests can drive time and inspect what was recorded.

#![allow(dead_code)]

use actix_web::dev::ServiceResponse;
use auth_gateway::app::{AppServices, Backends};
use auth_gateway::models::LoginRequest;
use auth_gateway::repositories::{InMemoryAttemptLog, InMemoryCredentialStore};
use auth_gateway::services::{
    Argon2Hasher, ClientContext, CredentialHasher, InMemoryEventSink, TotpSecret,
};
use auth_gateway::error::AuthResult;
use shared::clock::SharedClock;
use shared::config::PasswordHashConfig;
use shared::{AccountStatus, ManualClock, Role, SecurityConfig, SharedCounterStore, UserCredentials};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Test configuration constants
pub const TEST_JWT_SECRET: &str = "integration-signing-key-Zq8v1Lp0Xw7Ck3Hn5Bt9";
pub const PASSWORD: &str = "correct horse battery staple";
pub const START: i64 = 1_700_000_000;
pub const CLIENT_IP: &str = "203.0.113.10";

/// Argon2 with minimal cost that counts how often a hash is computed
pub struct CountingHasher {
    inner: Argon2Hasher,
    verifications: AtomicUsize,
}

impl CountingHasher {
    pub fn new() -> Self {
        let inner = Argon2Hasher::new(&PasswordHashConfig {
            memory_kib: Some(1024),
            iterations: Some(1),
        })
        .expect("test hash params are valid");

        Self {
            inner,
            verifications: AtomicUsize::new(0),
        }
    }

    /// Real and dummy verifications so far
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

impl CredentialHasher for CountingHasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        self.inner.hash(password)
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(password, hash)
    }

    fn dummy_verify(&self) {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.inner.dummy_verify();
    }
}

pub struct TestGateway {
    pub services: AppServices,
    pub clock: ManualClock,
    pub users: InMemoryCredentialStore,
    pub attempt_log: InMemoryAttemptLog,
    pub events: InMemoryEventSink,
    pub hasher: Arc<CountingHasher>,
}

/// Stock policy with a generous auth quota, so brute-force tests are not
/// cut short by the rate limiter
pub fn security_config() -> SecurityConfig {
    let mut security = SecurityConfig::default();
    security.rate_limits.auth_limit = 100;
    security
}

pub fn gateway(security: SecurityConfig) -> TestGateway {
    build(security, None)
}

/// Gateway whose rate limiter and attempt tracker run on `counter_store`
pub fn gateway_with_counter_store(
    security: SecurityConfig,
    counter_store: SharedCounterStore,
) -> TestGateway {
    build(security, Some(counter_store))
}

fn build(security: SecurityConfig, counter_store: Option<SharedCounterStore>) -> TestGateway {
    let clock = ManualClock::at_timestamp(START);
    let shared_clock: SharedClock = Arc::new(clock.clone());

    let users = InMemoryCredentialStore::new();
    let attempt_log = InMemoryAttemptLog::new();
    let events = InMemoryEventSink::new();
    let hasher = Arc::new(CountingHasher::new());

    let mut backends = Backends::in_memory(shared_clock.clone(), users.clone());
    backends.attempt_log = Arc::new(attempt_log.clone());
    if let Some(store) = counter_store {
        backends.counter_store = store;
        backends.memory_counters = None;
    }

    let services = AppServices::build(
        &security,
        TEST_JWT_SECRET,
        backends,
        hasher.clone(),
        shared_clock,
        Arc::new(events.clone()),
    );

    TestGateway {
        services,
        clock,
        users,
        attempt_log,
        events,
        hasher,
    }
}

impl TestGateway {
    /// Add an active account whose password is [`PASSWORD`]
    pub fn add_user(&self, username: &str, role: Role) -> UserCredentials {
        let user = UserCredentials {
            id: format!("user-{}", username),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            role,
            status: AccountStatus::Active,
            password_hash: self.hasher.hash(PASSWORD).expect("hashing succeeds"),
            totp_enabled: false,
            totp_secret: None,
            last_login_at: None,
        };
        self.users.insert(user.clone());
        user
    }

    /// Add an account with TOTP already enabled
    pub fn add_user_with_totp(&self, username: &str) -> (UserCredentials, TotpSecret) {
        let secret = self.services.two_factor.verifier().generate_secret();
        let mut user = self.add_user(username, Role::User);
        user.totp_enabled = true;
        user.totp_secret = Some(secret.expose().to_string());
        self.users.insert(user.clone());
        (user, secret)
    }

    pub fn seed_status(&self, user: &UserCredentials, status: AccountStatus) {
        let mut user = user.clone();
        user.status = status;
        self.users.insert(user);
    }

    pub async fn access_token(&self, user: &UserCredentials) -> String {
        self.services
            .tokens
            .issue(&user.id, user.role, &ClientContext::new(CLIENT_IP, None))
            .await
            .expect("token issue succeeds")
            .access_token
    }
}

pub fn login_request(identifier: &str, password: &str, code: Option<&str>) -> LoginRequest {
    LoginRequest {
        username_or_email: identifier.to_string(),
        password: password.to_string(),
        two_factor_code: code.map(str::to_string),
    }
}

pub fn ctx(ip: &str) -> ClientContext {
    ClientContext::new(ip, Some("integration-test".to_string()))
}

pub fn header<B>(resp: &ServiceResponse<B>, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
