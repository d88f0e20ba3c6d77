//! Background housekeeping for the gateway
//!
//! - **Counter eviction**: drops expired entries from the in-process counter
//!   store (only when that backend is in use; Redis expires keys itself)
//! - **Attempt log purge**: deletes login attempt records older than the
//!   retention window
//! - **Refresh token purge**: deletes refresh tokens that expired or were
//!   revoked more than one refresh lifetime ago
//!
//! # Usage
//!
//! ```ignore
//! use auth_gateway::background_tasks::BackgroundTaskRunner;
//!
//! let tasks = BackgroundTaskRunner::new(&services, config.security.housekeeping.clone()).start();
//!
//! // When shutting down:
//! tasks.shutdown().await;
//! ```
//!
//! Every task runs off the request path and stops when the runner's
//! [`CancellationToken`] is cancelled.

use chrono::{DateTime, TimeDelta, Utc};
use shared::clock::SharedClock;
use shared::config::HousekeepingConfig;
use shared::InMemoryCounterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app::AppServices;
use crate::repositories::AttemptLog;
use crate::services::TokenService;

/// Rows deleted by one purge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub attempt_records: u64,
    pub refresh_tokens: u64,
}

/// Periodic maintenance tasks
pub struct BackgroundTaskRunner {
    memory_counters: Option<Arc<InMemoryCounterStore>>,
    attempt_log: Arc<dyn AttemptLog>,
    tokens: Arc<TokenService>,
    clock: SharedClock,
    config: HousekeepingConfig,
}

/// Handle on running tasks
pub struct BackgroundTasks {
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task panicked");
            }
        }
        info!("Background tasks stopped");
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now - TimeDelta::from_std(age).unwrap_or(TimeDelta::MAX)
}

impl BackgroundTaskRunner {
    pub fn new(services: &AppServices, config: HousekeepingConfig) -> Self {
        Self {
            memory_counters: services.backends.memory_counters.clone(),
            attempt_log: services.backends.attempt_log.clone(),
            tokens: services.tokens.clone(),
            clock: services.clock.clone(),
            config,
        }
    }

    /// Start all background tasks
    pub fn start(self) -> BackgroundTasks {
        let cancel_token = CancellationToken::new();
        let runner = Arc::new(self);
        let mut handles = Vec::with_capacity(2);

        if runner.memory_counters.is_some() {
            let task_runner = runner.clone();
            let token = cancel_token.clone();
            handles.push(tokio::spawn(async move {
                task_runner.run_counter_eviction(token).await;
            }));
        }

        let task_runner = runner.clone();
        let token = cancel_token.clone();
        handles.push(tokio::spawn(async move {
            task_runner.run_purge(token).await;
        }));

        info!(
            eviction_interval_secs = runner.config.eviction_interval.as_secs(),
            purge_interval_secs = runner.config.purge_interval.as_secs(),
            counter_eviction = runner.memory_counters.is_some(),
            "Background tasks started"
        );

        BackgroundTasks {
            cancel_token,
            handles,
        }
    }

    async fn run_counter_eviction(&self, cancel_token: CancellationToken) {
        let mut interval = interval(self.config.eviction_interval);

        // Skip the first tick (which fires immediately)
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Counter eviction task stopping due to shutdown");
                    break;
                }
                _ = interval.tick() => {
                    self.evict_counters();
                }
            }
        }
    }

    async fn run_purge(&self, cancel_token: CancellationToken) {
        let mut interval = interval(self.config.purge_interval);

        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Purge task stopping due to shutdown");
                    break;
                }
                _ = interval.tick() => {
                    self.purge().await;
                }
            }
        }
    }

    /// Evict expired in-memory counters once; returns how many were dropped
    pub fn evict_counters(&self) -> usize {
        let Some(store) = &self.memory_counters else {
            return 0;
        };

        let evicted = store.evict_expired();
        if evicted > 0 {
            debug!(evicted = evicted, remaining = store.len(), "Evicted expired counters");
        }
        evicted
    }

    /// Run one purge pass over the attempt log and refresh tokens
    pub async fn purge(&self) -> PurgeReport {
        let now = self.clock.now();
        let mut report = PurgeReport::default();

        match self
            .attempt_log
            .purge_older_than(cutoff(now, self.config.attempt_retention))
            .await
        {
            Ok(count) => report.attempt_records = count,
            Err(e) => error!(error = %format!("{:#}", e), "Failed to purge login attempt records"),
        }

        // Revoked tokens stay around for one refresh lifetime so reuse is still detected
        let token_cutoff = cutoff(now, self.tokens.config().refresh_token_ttl);
        match self.tokens.purge_before(token_cutoff).await {
            Ok(count) => report.refresh_tokens = count,
            Err(e) => error!(error = %e, "Failed to purge refresh tokens"),
        }

        if report != PurgeReport::default() {
            info!(
                attempt_records = report.attempt_records,
                refresh_tokens = report.refresh_tokens,
                "Purged expired records"
            );
        } else {
            debug!("Nothing to purge");
        }
        report
    }
}
