//! Login Orchestrator
//!
//! Drives one login request through the gate:
//!
//! ```text
//! RECEIVED -> RATE_CHECKED -> BLOCK_CHECKED -> CREDENTIAL_VERIFIED
//!          -> (TWO_FACTOR_REQUIRED -> TWO_FACTOR_VERIFIED)?
//!          -> ATTEMPT_RECORDED -> TOKEN_ISSUED
//! ```
//!
//! Rate-limited and blocked requests stop before the password hash is
//! computed and are not counted as attempts. Every request that reaches
//! credential evaluation records exactly one attempt. The orchestrator holds
//! no state of its own.

use chrono::{DateTime, Utc};
use shared::clock::SharedClock;
use shared::{LoginAttemptRecord, RateLimitDecision, RateLimiter, RouteClass, UserCredentials};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::error::{AuthError, AuthResult};
use crate::models::{AuthResponse, LoginRequest, UserSummary};
use crate::repositories::{AttemptLog, CredentialStore};
use crate::services::attempt_tracker::{AttemptTracker, ClientIdentity};
use crate::services::password::CredentialHasher;
use crate::services::security_events::{SecurityEvent, SharedEventSink};
use crate::services::token_service::{ClientContext, TokenService};
use crate::services::two_factor::TwoFactorService;

/// Furthest state a login reached before it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginStage {
    Received,
    RateChecked,
    BlockChecked,
    CredentialVerified,
    TwoFactorRequired,
    TwoFactorVerified,
    AttemptRecorded,
    TokenIssued,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub stage: LoginStage,
    /// Quota state to expose as response headers, whatever the result
    pub rate_limit: RateLimitDecision,
    /// Whether this request was counted by the attempt tracker
    pub attempt_recorded: bool,
    pub result: AuthResult<AuthResponse>,
}

impl LoginOutcome {
    fn metric_label(&self) -> &'static str {
        match &self.result {
            Ok(_) => "success",
            Err(AuthError::RateLimited { .. }) => "rate_limited",
            Err(AuthError::Blocked { .. }) => "blocked",
            Err(AuthError::InvalidCredentials) => "invalid_credentials",
            Err(AuthError::TwoFactorRequired { .. }) => "two_factor_required",
            Err(AuthError::InvalidTwoFactorCode) => "invalid_two_factor_code",
            Err(_) => "error",
        }
    }
}

/// One request's progress through the state machine
struct Attempt<'a> {
    ctx: &'a ClientContext,
    identifier: String,
    identity: ClientIdentity,
    at: DateTime<Utc>,
    stage: LoginStage,
    recorded: bool,
}

pub struct LoginService {
    rate_limiter: RateLimiter,
    tracker: Arc<AttemptTracker>,
    users: Arc<dyn CredentialStore>,
    hasher: Arc<dyn CredentialHasher>,
    two_factor: Arc<TwoFactorService>,
    tokens: Arc<TokenService>,
    attempt_log: Arc<dyn AttemptLog>,
    events: SharedEventSink,
    clock: SharedClock,
}

impl LoginService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rate_limiter: RateLimiter,
        tracker: Arc<AttemptTracker>,
        users: Arc<dyn CredentialStore>,
        hasher: Arc<dyn CredentialHasher>,
        two_factor: Arc<TwoFactorService>,
        tokens: Arc<TokenService>,
        attempt_log: Arc<dyn AttemptLog>,
        events: SharedEventSink,
        clock: SharedClock,
    ) -> Self {
        Self {
            rate_limiter,
            tracker,
            users,
            hasher,
            two_factor,
            tokens,
            attempt_log,
            events,
            clock,
        }
    }

    pub async fn login(&self, request: &LoginRequest, ctx: &ClientContext) -> LoginOutcome {
        self.drive(Ok(request), ctx).await
    }

    /// Login for a body that may have failed to parse.
    ///
    /// The rate check still runs first, so an unparseable body counts
    /// against the quota and carries the same headers as any other login.
    pub async fn login_or_reject(
        &self,
        request: AuthResult<LoginRequest>,
        ctx: &ClientContext,
    ) -> LoginOutcome {
        match request {
            Ok(request) => self.drive(Ok(&request), ctx).await,
            Err(e) => self.drive(Err(e), ctx).await,
        }
    }

    async fn drive(&self, request: AuthResult<&LoginRequest>, ctx: &ClientContext) -> LoginOutcome {
        let rate_limit = self.rate_limiter.check(RouteClass::Auth, &ctx.ip).await;

        let (stage, attempt_recorded, result) = if !rate_limit.allowed {
            let retry_after = rate_limit.retry_after;
            (LoginStage::Received, false, Err(AuthError::RateLimited { retry_after }))
        } else {
            match request {
                Err(e) => (LoginStage::RateChecked, false, Err(e)),
                Ok(request) => {
                    let identifier = request.username_or_email.trim().to_string();
                    let mut attempt = Attempt {
                        ctx,
                        identity: self.tracker.identity_for(&ctx.ip, &identifier),
                        identifier,
                        at: self.clock.now(),
                        stage: LoginStage::RateChecked,
                        recorded: false,
                    };
                    let result = self.run(request, &mut attempt).await;
                    (attempt.stage, attempt.recorded, result)
                }
            }
        };

        let outcome = LoginOutcome {
            stage,
            rate_limit,
            attempt_recorded,
            result,
        };

        metrics::counter!("login_attempts_total", "outcome" => outcome.metric_label()).increment(1);
        debug!(
            ip = %ctx.ip,
            stage = ?outcome.stage,
            outcome = outcome.metric_label(),
            "Login finished"
        );
        outcome
    }

    async fn run(&self, request: &LoginRequest, attempt: &mut Attempt<'_>) -> AuthResult<AuthResponse> {
        request
            .validate()
            .map_err(|e| AuthError::validation(format!("Validation failed: {}", e)))?;

        let block = self.tracker.block_status(&attempt.identity).await;
        if block.blocked {
            return Err(AuthError::Blocked {
                retry_after: block.retry_after,
            });
        }
        attempt.stage = LoginStage::BlockChecked;

        let user = self
            .users
            .find_user_by_identifier(&attempt.identifier)
            .await
            .map_err(|e| {
                error!(error = %format!("{:#}", e), "Credential store lookup failed");
                AuthError::internal("Credential store unavailable")
            })?;

        let Some(user) = self.verify_password(user, &request.password).await? else {
            self.record(attempt, false).await;
            return Err(AuthError::InvalidCredentials);
        };
        attempt.stage = LoginStage::CredentialVerified;

        if user.totp_enabled {
            attempt.stage = LoginStage::TwoFactorRequired;
            self.check_second_factor(&user, request.two_factor_code.as_deref(), attempt)
                .await?;
            attempt.stage = LoginStage::TwoFactorVerified;
        }

        self.record(attempt, true).await;
        attempt.stage = LoginStage::AttemptRecorded;

        let tokens = self.tokens.issue(&user.id, user.role, attempt.ctx).await?;
        attempt.stage = LoginStage::TokenIssued;

        if let Err(e) = self.users.update_last_login(&user.id, attempt.at).await {
            warn!(user_id = %user.id, error = %format!("{:#}", e), "Failed to update last login");
        }

        info!(user_id = %user.id, ip = %attempt.ctx.ip, "User logged in");

        Ok(AuthResponse {
            tokens,
            user: UserSummary::from(&user),
        })
    }

    /// Hash comparison off the async workers; unknown accounts burn a dummy verification
    async fn verify_password(
        &self,
        user: Option<UserCredentials>,
        password: &str,
    ) -> AuthResult<Option<UserCredentials>> {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || match user {
            Some(user) => {
                let matches = hasher.verify(&password, &user.password_hash);
                (matches && user.is_active()).then_some(user)
            }
            None => {
                hasher.dummy_verify();
                None
            }
        })
        .await
        .map_err(|e| AuthError::internal(format!("Password verification task failed: {}", e)))
    }

    async fn check_second_factor(
        &self,
        user: &UserCredentials,
        code: Option<&str>,
        attempt: &mut Attempt<'_>,
    ) -> AuthResult<()> {
        let code = code.map(str::trim).filter(|c| !c.is_empty());

        let Some(code) = code else {
            // Counted as a failure so holding the password alone cannot reset the budget
            self.record(attempt, false).await;
            let challenge = self.tokens.issue_challenge(&user.id, user.role)?;
            return Err(AuthError::TwoFactorRequired { challenge });
        };

        let verified = match self.two_factor.verify_second_factor(user, code, attempt.at).await {
            Ok(verified) => verified,
            Err(e) => {
                self.record(attempt, false).await;
                return Err(e);
            }
        };

        if verified.is_none() {
            self.record(attempt, false).await;
            self.events.record(SecurityEvent::TwoFactorFailed {
                user_id: user.id.clone(),
                ip: attempt.ctx.ip.clone(),
            });
            return Err(AuthError::InvalidTwoFactorCode);
        }

        Ok(())
    }

    async fn record(&self, attempt: &mut Attempt<'_>, success: bool) {
        if attempt.recorded {
            return;
        }
        attempt.recorded = true;

        self.tracker.record_attempt(&attempt.identity, success).await;

        let record = LoginAttemptRecord {
            ip: attempt.ctx.ip.clone(),
            username: attempt.identifier.clone(),
            success,
            user_agent: attempt.ctx.user_agent.clone(),
            created_at: attempt.at,
        };
        if let Err(e) = self.attempt_log.append(&record).await {
            warn!(ip = %attempt.ctx.ip, error = %format!("{:#}", e), "Failed to append login attempt record");
        }
    }
}
