//! Security event sink
//!
//! Blocks, second-factor failures, refresh-token reuse and operator unblocks
//! are reported here. Recording is synchronous and must never fail the
//! request that triggered it.

use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// An identity crossed the failure threshold
    BlockApplied {
        identity: String,
        failures: i64,
        block_secs: u64,
    },
    /// Password ok, second factor wrong
    TwoFactorFailed { user_id: String, ip: String },
    /// An already-rotated refresh token was presented again
    RefreshTokenReuse { user_id: String, revoked: u64 },
    /// An operator lifted a block
    IdentityUnblocked { identity: String, operator: String },
    /// A user confirmed TOTP enrolment
    TwoFactorEnabled { user_id: String },
}

pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

pub type SharedEventSink = Arc<dyn SecurityEventSink>;

/// Emits events as `warn!` records on the `security` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn record(&self, event: SecurityEvent) {
        match event {
            SecurityEvent::BlockApplied {
                identity,
                failures,
                block_secs,
            } => warn!(
                target: "security",
                identity = %identity,
                failures = failures,
                block_secs = block_secs,
                "Brute-force block applied"
            ),
            SecurityEvent::TwoFactorFailed { user_id, ip } => warn!(
                target: "security",
                user_id = %user_id,
                ip = %ip,
                "Invalid two-factor code"
            ),
            SecurityEvent::RefreshTokenReuse { user_id, revoked } => warn!(
                target: "security",
                user_id = %user_id,
                revoked = revoked,
                "Refresh token reuse detected, all sessions revoked"
            ),
            SecurityEvent::IdentityUnblocked { identity, operator } => warn!(
                target: "security",
                identity = %identity,
                operator = %operator,
                "Block lifted by operator"
            ),
            SecurityEvent::TwoFactorEnabled { user_id } => warn!(
                target: "security",
                user_id = %user_id,
                "Two-factor authentication enabled"
            ),
        }
    }
}

/// Keeps events in memory; lets tests assert on what was reported
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SecurityEventSink for InMemoryEventSink {
    fn record(&self, event: SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
