//! Health check and metrics endpoints

use actix_web::{web, HttpResponse, Responder};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::app::Backends;

const PROBE_KEY: &str = "health:probe";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub counter_store: String,
    pub version: String,
}

/// Health of the gateway and its stores
///
/// GET /api/v1/health
///
/// The counter store being down degrades the gateway (limits fail open) but
/// does not make it unhealthy; the database does.
pub async fn health_check(backends: web::Data<Backends>) -> impl Responder {
    let database = match &backends.pool {
        Some(pool) => match shared::db::check_health(pool).await {
            Ok(_) => "connected",
            Err(_) => "disconnected",
        },
        None => "in_memory",
    };

    let counter_store = match backends.counter_store.get(PROBE_KEY).await {
        Ok(_) => "connected",
        Err(_) => "degraded",
    };

    let healthy = database != "disconnected";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: database.to_string(),
        counter_store: counter_store.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if healthy {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// Prometheus text exposition
///
/// GET /metrics
pub async fn metrics(handle: web::Data<PrometheusHandle>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}
