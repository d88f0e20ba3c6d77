//! Route configuration for the API

use actix_web::web;
use shared::RouteClass;

use crate::app::AppServices;
use crate::handlers::{self, helpers::json_config};
use crate::middleware::RouteRateLimit;

/// Configure all routes
///
/// `/auth/login` counts against the `auth` quota inside the login flow
/// itself, so it sits outside the rate-limited `/auth` scope while sharing
/// its counters.
pub fn configure(cfg: &mut web::ServiceConfig, services: &AppServices) {
    services.register(cfg);
    cfg.app_data(json_config());

    cfg.service(
        web::scope("/api/v1")
            // Health check endpoint (no rate limit)
            .route("/health", web::get().to(handlers::health_check))
            .service(web::resource("/auth/login").route(web::post().to(handlers::login)))
            .service(
                web::scope("/auth")
                    .wrap(RouteRateLimit::new(services.rate_limiter.clone(), RouteClass::Auth))
                    .route("/refresh", web::post().to(handlers::refresh))
                    .route("/logout", web::post().to(handlers::logout))
                    .route("/2fa/enroll", web::post().to(handlers::two_factor::enroll))
                    .route("/2fa/confirm", web::post().to(handlers::two_factor::confirm)),
            )
            .service(
                web::scope("/admin")
                    .wrap(RouteRateLimit::new(services.rate_limiter.clone(), RouteClass::Api))
                    .route("/blocked", web::get().to(handlers::list_blocked))
                    .route("/blocked/{identity}", web::delete().to(handlers::unblock)),
            ),
    );

    if services.metrics.is_some() {
        cfg.route("/metrics", web::get().to(handlers::metrics));
    }
}
