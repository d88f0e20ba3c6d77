//! Authentication gateway server
//!
//! Login, token refresh and TOTP enrolment behind rate limiting and
//! brute-force protection.

use actix_web::{App, HttpServer};
use anyhow::Context;
use auth_gateway::app::{AppServices, Backends};
use auth_gateway::background_tasks::BackgroundTaskRunner;
use auth_gateway::routes;
use auth_gateway::services::{Argon2Hasher, TracingEventSink};
use metrics_exporter_prometheus::PrometheusBuilder;
use shared::clock::SharedClock;
use shared::{db, Config, CounterBackend, InMemoryCounterStore, RedisCounterStore, SystemClock};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    shared::init_tracing();

    tracing::info!("Starting authentication gateway...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    // Create database connection pool
    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    // Run database migrations
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    // Check database health
    db::check_health(&db_pool)
        .await
        .context("Database health check failed")?;

    let clock: SharedClock = Arc::new(SystemClock);

    let backends = match config.security.counter_backend {
        CounterBackend::Redis => {
            let redis = shared::redis::create_client(&config.redis.connection_url())
                .await
                .context("Failed to connect to Redis")?;
            let store = RedisCounterStore::with_namespace(redis, config.redis.namespace.clone());
            Backends::postgres(db_pool, Arc::new(store))
        }
        CounterBackend::Memory => {
            tracing::warn!("Using in-process counter store; limits are not shared between instances");
            let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
            Backends::postgres(db_pool, store.clone()).with_memory_counters(store)
        }
    };

    let hasher = Argon2Hasher::new(&config.security.password_hash)
        .context("Invalid password hash parameters")?;

    let services = AppServices::build(
        &config.security,
        &config.server.jwt_secret,
        backends,
        Arc::new(hasher),
        clock,
        Arc::new(TracingEventSink),
    )
    .with_metrics(metrics_handle);

    let background_tasks =
        BackgroundTaskRunner::new(&services, config.security.housekeeping.clone()).start();

    let server_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(
        counter_backend = ?config.security.counter_backend,
        blocking_scope = ?config.security.brute_force.scope,
        "Authentication gateway listening on {}",
        server_addr
    );

    // Start HTTP server
    let app_services = services.clone();
    let server_result = HttpServer::new(move || {
        let services = app_services.clone();
        App::new()
            .wrap(TracingLogger::default())
            .configure(move |cfg| routes::configure(cfg, &services))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind to {}", server_addr))?
    .run()
    .await
    .context("Server error");

    background_tasks.shutdown().await;
    server_result
}
