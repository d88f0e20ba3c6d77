//! Configuration management using environment variables
//!
//! # Security
//!
//! This module enforces security requirements for sensitive configuration:
//! - JWT_SECRET must be at least 32 characters (256 bits of entropy)
//! - Production mode rejects weak or default secrets
//! - Development mode warns but allows weaker secrets for testing
//!
//! Abuse-prevention thresholds live in [`SecurityConfig`]; every value has a
//! default so a bare environment yields the stock policy (5 failures per
//! 15 minutes, 30 minute block, 5 auth requests per minute).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Authentication and abuse-prevention policy
    pub security: SecurityConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub name: String,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to keep warm
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,

    /// SSL mode for database connection
    /// Options: disable, allow, prefer, require, verify-ca, verify-full
    pub ssl_mode: String,
}

impl DatabaseConfig {
    /// Build a PostgreSQL connection URL with SSL mode
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis host
    pub host: String,

    /// Redis port
    pub port: u16,

    /// Redis password (optional)
    pub password: Option<String>,

    /// Direct Redis URL (takes precedence over host/port/password)
    pub url: Option<String>,

    /// Prefix applied to every counter key
    pub namespace: Option<String>,
}

impl RedisConfig {
    /// Build a Redis connection URL
    ///
    /// If `url` is set (from REDIS_URL), uses that directly, which also
    /// covers `rediss://` (TLS). Otherwise builds from host/port/password.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        if let Some(password) = &self.password {
            format!("redis://:{}@{}:{}", password, self.host, self.port)
        } else {
            format!("redis://{}:{}", self.host, self.port)
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// JWT secret for signing access tokens
    pub jwt_secret: String,
}

/// Which Counter Store implementation backs the rate limiter and attempt tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterBackend {
    /// In-process map, single instance only
    Memory,
    /// Shared Redis, required when running more than one instance
    Redis,
}

impl FromStr for CounterBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(Error::config(format!(
                "Invalid COUNTER_BACKEND '{}': expected 'memory' or 'redis'",
                other
            ))),
        }
    }
}

/// What the brute-force tracker counts failures against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingScope {
    /// Client IP only; every account behind one address shares a budget
    Ip,
    /// Client IP and submitted username; one user's failures never lock out a neighbour
    IpAndUsername,
}

impl FromStr for BlockingScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "ip_and_username" | "ip+username" => Ok(Self::IpAndUsername),
            other => Err(Error::config(format!(
                "Invalid BRUTE_FORCE_SCOPE '{}': expected 'ip' or 'ip_and_username'",
                other
            ))),
        }
    }
}

/// Brute-force protection thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct BruteForceConfig {
    /// Failures within the window that trigger a block
    pub max_attempts: u32,
    /// Failure window; a gap longer than this starts a fresh count
    pub window: Duration,
    /// How long a block lasts, measured from the triggering failure
    pub block_duration: Duration,
    /// Identity the counters are keyed on
    pub scope: BlockingScope,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(30 * 60),
            scope: BlockingScope::Ip,
        }
    }
}

/// Per-route-class request quotas
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window on `/auth/*`
    pub auth_limit: u32,
    /// Requests per window on general API routes
    pub api_limit: u32,
    /// Requests per window on upload routes
    pub upload_limit: u32,
    /// Fixed window length shared by all classes
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_limit: 10,
            api_limit: 60,
            upload_limit: 20,
            window: Duration::from_secs(60),
        }
    }
}

/// Token lifetimes and TOTP provisioning
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Lifetime of the reference returned with `two_factor_required`
    pub challenge_ttl: Duration,
    /// Issuer shown in authenticator apps
    pub totp_issuer: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
            challenge_ttl: Duration::from_secs(300),
            totp_issuer: "AdminiSoftware".to_string(),
        }
    }
}

/// Background housekeeping cadence
#[derive(Debug, Clone, Deserialize)]
pub struct HousekeepingConfig {
    /// Login attempt records older than this are purged
    pub attempt_retention: Duration,
    /// How often expired in-memory counters are evicted
    pub eviction_interval: Duration,
    /// How often attempt records and dead refresh tokens are purged
    pub purge_interval: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            attempt_retention: Duration::from_secs(30 * 24 * 3600),
            eviction_interval: Duration::from_secs(60),
            purge_interval: Duration::from_secs(3600),
        }
    }
}

/// Argon2id cost parameters; `None` keeps the argon2 crate defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordHashConfig {
    pub memory_kib: Option<u32>,
    pub iterations: Option<u32>,
}

/// Authentication and abuse-prevention policy
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub counter_backend: CounterBackend,
    pub brute_force: BruteForceConfig,
    pub rate_limits: RateLimitConfig,
    pub tokens: TokenConfig,
    pub housekeeping: HousekeepingConfig,
    /// Proxies whose forwarding headers are believed (IPs or CIDRs)
    pub trusted_proxies: Vec<String>,
    pub password_hash: PasswordHashConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            counter_backend: CounterBackend::Memory,
            brute_force: BruteForceConfig::default(),
            rate_limits: RateLimitConfig::default(),
            tokens: TokenConfig::default(),
            housekeeping: HousekeepingConfig::default(),
            trusted_proxies: Vec::new(),
            password_hash: PasswordHashConfig::default(),
        }
    }
}

/// Read `name` and parse it, falling back to `default` when unset
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

/// Read an optional parsed value
fn env_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .ok()
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::config(format!("Invalid {}: {}", name, e)))
        })
        .transpose()
}

fn env_secs(name: &str, default_secs: u64) -> Result<Duration> {
    let secs: u64 = env_or(name, default_secs)?;
    if secs == 0 {
        return Err(Error::config(format!("{} must be greater than zero", name)));
    }
    Ok(Duration::from_secs(secs))
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl SecurityConfig {
    /// Load the security section from environment variables
    pub fn from_env() -> Result<Self> {
        let max_attempts: u32 = env_or("BRUTE_FORCE_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(Error::config("BRUTE_FORCE_MAX_ATTEMPTS must be at least 1"));
        }

        let refresh_days: u64 = env_or("REFRESH_TOKEN_TTL_DAYS", 30)?;
        let retention_days: u64 = env_or("ATTEMPT_RETENTION_DAYS", 30)?;

        Ok(Self {
            counter_backend: env_or("COUNTER_BACKEND", CounterBackend::Memory)?,
            brute_force: BruteForceConfig {
                max_attempts,
                window: env_secs("BRUTE_FORCE_WINDOW_SECS", 900)?,
                block_duration: env_secs("BRUTE_FORCE_BLOCK_SECS", 1800)?,
                scope: env_or("BRUTE_FORCE_SCOPE", BlockingScope::Ip)?,
            },
            rate_limits: RateLimitConfig {
                auth_limit: env_or("RATE_LIMIT_AUTH_PER_MINUTE", 10)?,
                api_limit: env_or("RATE_LIMIT_API_PER_MINUTE", 60)?,
                upload_limit: env_or("RATE_LIMIT_UPLOAD_PER_MINUTE", 20)?,
                window: env_secs("RATE_LIMIT_WINDOW_SECS", 60)?,
            },
            tokens: TokenConfig {
                access_token_ttl: env_secs("ACCESS_TOKEN_TTL_SECS", 3600)?,
                refresh_token_ttl: Duration::from_secs(refresh_days.max(1) * 24 * 3600),
                challenge_ttl: env_secs("TWO_FACTOR_CHALLENGE_TTL_SECS", 300)?,
                totp_issuer: env::var("TOTP_ISSUER")
                    .unwrap_or_else(|_| "AdminiSoftware".to_string()),
            },
            housekeeping: HousekeepingConfig {
                attempt_retention: Duration::from_secs(retention_days.max(1) * 24 * 3600),
                eviction_interval: env_secs("COUNTER_EVICTION_INTERVAL_SECS", 60)?,
                purge_interval: env_secs("HOUSEKEEPING_INTERVAL_SECS", 3600)?,
            },
            trusted_proxies: env::var("TRUSTED_PROXIES")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            password_hash: PasswordHashConfig {
                memory_kib: env_opt("PASSWORD_HASH_MEMORY_KIB")?,
                iterations: env_opt("PASSWORD_HASH_ITERATIONS")?,
            },
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env_or("DB_PORT", 5432)?,
                name: env::var("DB_NAME").unwrap_or_else(|_| "adminisoftware".to_string()),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD")
                    .map_err(|_| Error::config("DB_PASSWORD must be set"))?,
                max_connections: env_or("DB_MAX_CONNECTIONS", 50)?,
                min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
                acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT", 5)?,
                idle_timeout_secs: env_or("DB_IDLE_TIMEOUT", 180)?,
                max_lifetime_secs: env_or("DB_MAX_LIFETIME", 900)?,
                ssl_mode: env::var("DB_SSL_MODE").unwrap_or_else(|_| {
                    if cfg!(debug_assertions) {
                        "prefer".to_string()
                    } else {
                        "verify-full".to_string()
                    }
                }),
            },
            redis: RedisConfig {
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env_or("REDIS_PORT", 6379)?,
                password: env::var("REDIS_PASSWORD").ok(),
                url: env::var("REDIS_URL").ok(),
                namespace: env::var("REDIS_NAMESPACE").ok(),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 8080)?,
                jwt_secret: Self::load_and_validate_jwt_secret()?,
            },
            security: SecurityConfig::from_env()?,
        })
    }

    /// Load and validate the JWT secret with security checks
    ///
    /// # Security Requirements
    ///
    /// - Minimum 32 characters (256 bits of entropy) in production
    /// - Cannot be a known default/example value in production
    /// - Development mode allows weaker secrets with warnings
    fn load_and_validate_jwt_secret() -> Result<String> {
        let secret = if cfg!(debug_assertions) {
            env::var("JWT_SECRET").unwrap_or_else(|_| {
                tracing::warn!(
                    "JWT_SECRET not set - using development default. \
                     DO NOT use in production!"
                );
                "dev_secret_change_in_production_32chars".to_string()
            })
        } else {
            env::var("JWT_SECRET").map_err(|_| {
                Error::config("JWT_SECRET environment variable must be set in production")
            })?
        };

        validate_jwt_secret(&secret, !cfg!(debug_assertions))?;
        Ok(secret)
    }
}

/// Known weak/default patterns that should never be used in production
const WEAK_SECRET_PATTERNS: &[&str] = &[
    "dev_secret",
    "change_me",
    "changeme",
    "example",
    "secret",
    "password",
    "test",
    "default",
    "your_secret",
    "your-secret",
    "jwt_secret",
    "jwt-secret",
];

/// Check a signing secret; `strict` rejects what development only warns about
fn validate_jwt_secret(secret: &str, strict: bool) -> Result<()> {
    if strict && secret.len() < 32 {
        return Err(Error::config(format!(
            "JWT_SECRET must be at least 32 characters (256 bits of entropy). \
             Current length: {} characters. \
             Generate a secure secret with: openssl rand -base64 32",
            secret.len()
        )));
    }

    let secret_lower = secret.to_lowercase();
    for pattern in WEAK_SECRET_PATTERNS {
        if secret_lower.contains(pattern) {
            if strict {
                return Err(Error::config(format!(
                    "JWT_SECRET contains weak pattern '{}'. \
                     Use a cryptographically secure random value. \
                     Generate with: openssl rand -base64 32",
                    pattern
                )));
            }
            tracing::error!(
                "JWT_SECRET contains weak pattern '{}'. \
                 This is acceptable in development but MUST be changed for production!",
                pattern
            );
        }
    }

    if strict {
        let unique_chars: std::collections::HashSet<char> = secret.chars().collect();
        if unique_chars.len() < 10 {
            return Err(Error::config(
                "JWT_SECRET has low entropy (too few unique characters). \
                 Use a cryptographically secure random value. \
                 Generate with: openssl rand -base64 32",
            ));
        }
    }

    Ok(())
}
