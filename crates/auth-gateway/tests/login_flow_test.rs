//! Login flow tests against the full service graph
//!
//! Exercises the login state machine end to end on in-memory stores:
//! brute-force blocking and expiry, second factor handling, enumeration
//! resistance, blocking scope and concurrent accounting.

mod common;

use auth_gateway::error::AuthError;
use auth_gateway::repositories::CredentialStore;
use auth_gateway::services::{ClientIdentity, LoginStage, SecurityEvent};
use chrono::TimeDelta;
use common::*;
use shared::{AccountStatus, BlockingScope, Clock, Role};
use std::time::Duration;

#[tokio::test]
async fn test_sixth_attempt_blocked_even_with_correct_password() {
    let gw = gateway(security_config());
    gw.add_user("alice", Role::User);

    for _ in 0..5 {
        let outcome = gw
            .services
            .login
            .login(&login_request("alice", "wrong", None), &ctx(CLIENT_IP))
            .await;
        assert_eq!(outcome.result.unwrap_err(), AuthError::InvalidCredentials);
        assert!(outcome.attempt_recorded);
    }

    let hashes_before = gw.hasher.verifications();
    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx(CLIENT_IP))
        .await;

    assert_eq!(outcome.result.unwrap_err(), AuthError::Blocked { retry_after: 1800 });
    assert_eq!(outcome.stage, LoginStage::RateChecked);
    assert!(!outcome.attempt_recorded);
    // A blocked request never reaches the password hash
    assert_eq!(gw.hasher.verifications(), hashes_before);

    assert!(gw.events.events().iter().any(|e| matches!(
        e,
        SecurityEvent::BlockApplied { failures: 5, .. }
    )));
}

#[tokio::test]
async fn test_stock_policy_blocks_before_rate_limiting() {
    let gw = gateway(shared::SecurityConfig::default());
    gw.add_user("alice", Role::User);

    for _ in 0..5 {
        let outcome = gw
            .services
            .login
            .login(&login_request("alice", "wrong", None), &ctx("1.2.3.4"))
            .await;
        assert_eq!(outcome.result.unwrap_err(), AuthError::InvalidCredentials);
    }

    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx("1.2.3.4"))
        .await;

    assert_eq!(outcome.result.unwrap_err(), AuthError::Blocked { retry_after: 1800 });
    assert!(outcome.rate_limit.allowed);
    assert_eq!(outcome.rate_limit.remaining, 4);
}

#[tokio::test]
async fn test_block_lifts_after_block_duration() {
    let gw = gateway(security_config());
    gw.add_user("alice", Role::User);

    for _ in 0..5 {
        gw.services
            .login
            .login(&login_request("alice", "wrong", None), &ctx(CLIENT_IP))
            .await;
    }

    gw.clock.advance(Duration::from_secs(1799));
    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    assert_eq!(outcome.result.unwrap_err(), AuthError::Blocked { retry_after: 1 });

    gw.clock.advance(Duration::from_secs(1));
    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx(CLIENT_IP))
        .await;

    let auth = outcome.result.unwrap();
    assert_eq!(outcome.stage, LoginStage::TokenIssued);
    assert_eq!(auth.user.username, "alice");
    assert_eq!(auth.tokens.token_type, "Bearer");
}

#[tokio::test]
async fn test_success_clears_failures_and_updates_last_login() {
    let gw = gateway(security_config());
    let alice = gw.add_user("alice", Role::User);
    let identity = ClientIdentity::ip(CLIENT_IP);

    for _ in 0..4 {
        gw.services
            .login
            .login(&login_request("alice", "wrong", None), &ctx(CLIENT_IP))
            .await;
    }
    assert_eq!(gw.services.tracker.failure_count(&identity).await.unwrap(), 4);

    let outcome = gw
        .services
        .login
        .login(&login_request("ALICE@example.com", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    assert!(outcome.result.is_ok());
    assert_eq!(gw.services.tracker.failure_count(&identity).await.unwrap(), 0);

    let records = gw.attempt_log.records();
    assert_eq!(records.len(), 5);
    assert!(records.last().unwrap().success);
    assert_eq!(records[0].user_agent.as_deref(), Some("integration-test"));

    let stored = gw.services.backends.users.find_user_by_id(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored.last_login_at, Some(gw.clock.now()));
}

#[tokio::test]
async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
    let gw = gateway(security_config());
    let mallory = gw.add_user("mallory", Role::User);
    gw.add_user("alice", Role::User);
    gw.seed_status(&mallory, AccountStatus::Suspended);

    let hashes_before = gw.hasher.verifications();

    let unknown = gw
        .services
        .login
        .login(&login_request("nobody", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    let wrong = gw
        .services
        .login
        .login(&login_request("alice", "wrong", None), &ctx(CLIENT_IP))
        .await;
    let suspended = gw
        .services
        .login
        .login(&login_request("mallory", PASSWORD, None), &ctx(CLIENT_IP))
        .await;

    for outcome in [&unknown, &wrong, &suspended] {
        assert_eq!(outcome.result.as_ref().unwrap_err(), &AuthError::InvalidCredentials);
        assert_eq!(outcome.stage, LoginStage::BlockChecked);
        assert!(outcome.attempt_recorded);
    }
    // Unknown identifiers still pay for one hash computation
    assert_eq!(gw.hasher.verifications(), hashes_before + 3);
}

#[tokio::test]
async fn test_two_factor_required_then_codes_within_skew() {
    let gw = gateway(security_config());
    let (_user, secret) = gw.add_user_with_totp("bob");
    let verifier = gw.services.two_factor.verifier();
    let now = gw.clock.now();

    let outcome = gw
        .services
        .login
        .login(&login_request("bob", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    match outcome.result {
        Err(AuthError::TwoFactorRequired { challenge }) => assert!(!challenge.is_empty()),
        other => panic!("expected two_factor_required, got {:?}", other),
    }
    assert_eq!(outcome.stage, LoginStage::TwoFactorRequired);
    assert!(outcome.attempt_recorded);
    assert_eq!(
        gw.services
            .tracker
            .failure_count(&ClientIdentity::ip(CLIENT_IP))
            .await
            .unwrap(),
        1
    );

    let current = verifier.generate(&secret, now).unwrap();
    let outcome = gw
        .services
        .login
        .login(&login_request("bob", PASSWORD, Some(&current)), &ctx(CLIENT_IP))
        .await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.stage, LoginStage::TokenIssued);

    let previous = verifier.generate(&secret, now - TimeDelta::seconds(30)).unwrap();
    let outcome = gw
        .services
        .login
        .login(&login_request("bob", PASSWORD, Some(&previous)), &ctx(CLIENT_IP))
        .await;
    assert!(outcome.result.is_ok());

    let stale = verifier.generate(&secret, now - TimeDelta::seconds(60)).unwrap();
    let outcome = gw
        .services
        .login
        .login(&login_request("bob", PASSWORD, Some(&stale)), &ctx(CLIENT_IP))
        .await;
    assert_eq!(outcome.result.unwrap_err(), AuthError::InvalidTwoFactorCode);
    assert!(outcome.attempt_recorded);

    assert!(gw
        .events
        .events()
        .iter()
        .any(|e| matches!(e, SecurityEvent::TwoFactorFailed { .. })));
}

#[tokio::test]
async fn test_two_factor_prompts_count_toward_block() {
    let gw = gateway(security_config());
    gw.add_user_with_totp("bob");

    for _ in 0..5 {
        let outcome = gw
            .services
            .login
            .login(&login_request("bob", PASSWORD, None), &ctx(CLIENT_IP))
            .await;
        assert!(matches!(outcome.result, Err(AuthError::TwoFactorRequired { .. })));
    }

    let outcome = gw
        .services
        .login
        .login(&login_request("bob", PASSWORD, Some("000000")), &ctx(CLIENT_IP))
        .await;
    assert!(matches!(outcome.result, Err(AuthError::Blocked { .. })));
}

#[tokio::test]
async fn test_ip_scope_locks_out_neighbours() {
    let gw = gateway(security_config());
    gw.add_user("alice", Role::User);
    gw.add_user("mallory", Role::User);

    for _ in 0..5 {
        gw.services
            .login
            .login(&login_request("mallory", "guess", None), &ctx(CLIENT_IP))
            .await;
    }

    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    assert!(matches!(outcome.result, Err(AuthError::Blocked { .. })));

    // Another address is unaffected
    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx("198.51.100.7"))
        .await;
    assert!(outcome.result.is_ok());
}

#[tokio::test]
async fn test_ip_and_username_scope_isolates_accounts() {
    let mut security = security_config();
    security.brute_force.scope = BlockingScope::IpAndUsername;
    let gw = gateway(security);
    gw.add_user("alice", Role::User);
    gw.add_user("mallory", Role::User);

    for _ in 0..5 {
        gw.services
            .login
            .login(&login_request("mallory", "guess", None), &ctx(CLIENT_IP))
            .await;
    }

    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    assert!(outcome.result.is_ok());

    let outcome = gw
        .services
        .login
        .login(&login_request("Mallory", PASSWORD, None), &ctx(CLIENT_IP))
        .await;
    assert!(matches!(outcome.result, Err(AuthError::Blocked { .. })));
}

#[tokio::test]
async fn test_rate_limited_login_is_not_an_attempt() {
    let mut security = security_config();
    security.rate_limits.auth_limit = 3;
    let gw = gateway(security);
    gw.add_user("alice", Role::User);

    for _ in 0..3 {
        gw.services
            .login
            .login(&login_request("alice", "wrong", None), &ctx(CLIENT_IP))
            .await;
    }

    let hashes_before = gw.hasher.verifications();
    let outcome = gw
        .services
        .login
        .login(&login_request("alice", PASSWORD, None), &ctx(CLIENT_IP))
        .await;

    assert!(matches!(outcome.result, Err(AuthError::RateLimited { .. })));
    assert_eq!(outcome.stage, LoginStage::Received);
    assert!(!outcome.attempt_recorded);
    assert!(!outcome.rate_limit.allowed);
    assert_eq!(outcome.rate_limit.remaining, 0);
    assert_eq!(gw.hasher.verifications(), hashes_before);
    assert_eq!(gw.attempt_log.records().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let mut security = security_config();
    security.brute_force.max_attempts = 1000;
    security.rate_limits.auth_limit = 1000;
    let gw = gateway(security);
    gw.add_user("alice", Role::User);

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let login = gw.services.login.clone();
            tokio::spawn(async move {
                login
                    .login(&login_request("alice", "wrong", None), &ctx(CLIENT_IP))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.result.unwrap_err(), AuthError::InvalidCredentials);
    }

    let count = gw
        .services
        .tracker
        .failure_count(&ClientIdentity::ip(CLIENT_IP))
        .await
        .unwrap();
    assert_eq!(count, 40);
    assert_eq!(gw.attempt_log.records().len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backup_code_succeeds_exactly_once_under_race() {
    let mut security = security_config();
    security.brute_force.max_attempts = 100;
    let gw = gateway(security);
    let carol = gw.add_user("carol", Role::User);

    let enrolment = gw
        .services
        .two_factor
        .begin_enrollment(&carol.id, None, gw.clock.now())
        .await
        .unwrap();
    let secret = auth_gateway::services::TotpSecret::from_base32(enrolment.secret.clone());
    let code = gw
        .services
        .two_factor
        .verifier()
        .generate(&secret, gw.clock.now())
        .unwrap();
    let confirmed = gw
        .services
        .two_factor
        .confirm_enrollment(&carol.id, &code, gw.clock.now())
        .await
        .unwrap();
    assert_eq!(confirmed.backup_codes.len(), 10);

    let backup = confirmed.backup_codes[0].clone();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let login = gw.services.login.clone();
            let backup = backup.clone();
            tokio::spawn(async move {
                login
                    .login(
                        &login_request("carol", PASSWORD, Some(&backup)),
                        &ctx(&format!("198.51.100.{}", i + 1)),
                    )
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap().result {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e, AuthError::InvalidTwoFactorCode),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(
        gw.services.two_factor.remaining_backup_codes(&carol.id).await.unwrap(),
        9
    );
}
