//! Composition root for the gateway's services
//!
//! Every store and policy object is constructed here once and passed down
//! explicitly. Storage backends are chosen by the caller through
//! [`Backends`]; service code never branches on which one it got.

use actix_web::web;
use metrics_exporter_prometheus::PrometheusHandle;
use shared::clock::SharedClock;
use shared::{DbPool, InMemoryCounterStore, RateLimiter, SecurityConfig, SharedCounterStore};
use std::sync::Arc;

use crate::middleware::TrustedProxies;
use crate::repositories::{
    AttemptLog, BackupCodeStore, CredentialStore, InMemoryAttemptLog, InMemoryBackupCodeStore,
    InMemoryCredentialStore, InMemoryRefreshTokenStore, PgAttemptLog, PgBackupCodeStore,
    PgCredentialStore, PgRefreshTokenStore, RefreshTokenStore,
};
use crate::services::{
    AttemptTracker, CredentialHasher, LoginService, SharedEventSink, TokenService, TotpVerifier,
    TwoFactorService,
};

/// Storage implementations the services run on
#[derive(Clone)]
pub struct Backends {
    pub counter_store: SharedCounterStore,
    pub users: Arc<dyn CredentialStore>,
    pub attempt_log: Arc<dyn AttemptLog>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub backup_codes: Arc<dyn BackupCodeStore>,
    /// Present when backed by PostgreSQL; used by the health check
    pub pool: Option<DbPool>,
    /// Present when counters live in process and need periodic eviction
    pub memory_counters: Option<Arc<InMemoryCounterStore>>,
}

impl Backends {
    /// PostgreSQL persistence over the given counter store
    pub fn postgres(pool: DbPool, counter_store: SharedCounterStore) -> Self {
        Self {
            counter_store,
            users: Arc::new(PgCredentialStore::new(pool.clone())),
            attempt_log: Arc::new(PgAttemptLog::new(pool.clone())),
            refresh_tokens: Arc::new(PgRefreshTokenStore::new(pool.clone())),
            backup_codes: Arc::new(PgBackupCodeStore::new(pool.clone())),
            pool: Some(pool),
            memory_counters: None,
        }
    }

    /// Use an in-process counter store, registered for eviction
    pub fn with_memory_counters(mut self, store: Arc<InMemoryCounterStore>) -> Self {
        self.counter_store = store.clone() as SharedCounterStore;
        self.memory_counters = Some(store);
        self
    }

    /// Everything in process memory
    pub fn in_memory(clock: SharedClock, users: InMemoryCredentialStore) -> Self {
        let counters = Arc::new(InMemoryCounterStore::with_clock(clock));
        Self {
            counter_store: counters.clone(),
            users: Arc::new(users),
            attempt_log: Arc::new(InMemoryAttemptLog::new()),
            refresh_tokens: Arc::new(InMemoryRefreshTokenStore::new()),
            backup_codes: Arc::new(InMemoryBackupCodeStore::new()),
            pool: None,
            memory_counters: Some(counters),
        }
    }
}

/// Constructed services, cheap to clone into each HTTP worker
#[derive(Clone)]
pub struct AppServices {
    pub rate_limiter: RateLimiter,
    pub tracker: Arc<AttemptTracker>,
    pub tokens: Arc<TokenService>,
    pub two_factor: Arc<TwoFactorService>,
    pub login: Arc<LoginService>,
    pub trusted_proxies: TrustedProxies,
    pub backends: Backends,
    pub clock: SharedClock,
    pub metrics: Option<PrometheusHandle>,
}

impl AppServices {
    pub fn build(
        security: &SecurityConfig,
        jwt_secret: &str,
        backends: Backends,
        hasher: Arc<dyn CredentialHasher>,
        clock: SharedClock,
        events: SharedEventSink,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            backends.counter_store.clone(),
            clock.clone(),
            security.rate_limits.clone(),
        );

        let tracker = Arc::new(AttemptTracker::new(
            backends.counter_store.clone(),
            clock.clone(),
            security.brute_force.clone(),
            events.clone(),
        ));

        let tokens = Arc::new(TokenService::new(
            jwt_secret,
            security.tokens.clone(),
            backends.refresh_tokens.clone(),
            backends.users.clone(),
            clock.clone(),
            events.clone(),
        ));

        let two_factor = Arc::new(TwoFactorService::new(
            TotpVerifier::new(security.tokens.totp_issuer.clone()),
            backends.users.clone(),
            backends.backup_codes.clone(),
            events.clone(),
        ));

        let login = Arc::new(LoginService::new(
            rate_limiter.clone(),
            tracker.clone(),
            backends.users.clone(),
            hasher,
            two_factor.clone(),
            tokens.clone(),
            backends.attempt_log.clone(),
            events,
            clock.clone(),
        ));

        Self {
            rate_limiter,
            tracker,
            tokens,
            two_factor,
            login,
            trusted_proxies: TrustedProxies::new(&security.trusted_proxies),
            backends,
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Register every service as actix app data
    pub fn register(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(self.login.clone()))
            .app_data(web::Data::from(self.tokens.clone()))
            .app_data(web::Data::from(self.two_factor.clone()))
            .app_data(web::Data::from(self.tracker.clone()))
            .app_data(web::Data::new(self.trusted_proxies.clone()))
            .app_data(web::Data::new(self.clock.clone()))
            .app_data(web::Data::new(self.backends.clone()));

        if let Some(handle) = &self.metrics {
            cfg.app_data(web::Data::new(handle.clone()));
        }
    }
}
