//! Route-class rate limiter middleware
//!
//! Wraps a scope and counts every request against that scope's
//! [`RouteClass`] quota, keyed by client IP.
//!
//! # Response Headers
//!
//! Added to every response, allowed or not:
//!
//! - `X-RateLimit-Limit`: Maximum requests allowed in window
//! - `X-RateLimit-Remaining`: Remaining quota
//! - `X-RateLimit-Reset`: Unix timestamp when the window ends
//! - `X-RateLimit-Status: degraded` when the counter store failed open
//!
//! Rejections are `429` with the `rate_limited` error body and `Retry-After`.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use shared::{RateLimitDecision, RateLimiter, RouteClass};
use std::{
    future::{ready, Ready},
    rc::Rc,
};
use tracing::debug;

use crate::error::AuthError;
use crate::middleware::ip_extractor::extract_ip;

/// Header name/value pairs describing a decision
pub fn rate_limit_headers(decision: &RateLimitDecision) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = vec![
        (
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(decision.limit),
        ),
        (
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(decision.remaining),
        ),
        (
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(decision.reset_at),
        ),
    ];
    if decision.degraded {
        headers.push((
            HeaderName::from_static("x-ratelimit-status"),
            HeaderValue::from_static("degraded"),
        ));
    }
    headers
}

fn insert_headers(map: &mut HeaderMap, decision: &RateLimitDecision) {
    for (name, value) in rate_limit_headers(decision) {
        map.insert(name, value);
    }
}

/// Rate limiter for one route class
pub struct RouteRateLimit {
    rate_limiter: Rc<RateLimiter>,
    class: RouteClass,
}

impl RouteRateLimit {
    pub fn new(rate_limiter: RateLimiter, class: RouteClass) -> Self {
        Self {
            rate_limiter: Rc::new(rate_limiter),
            class,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RouteRateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RouteRateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RouteRateLimitMiddleware {
            service: Rc::new(service),
            rate_limiter: self.rate_limiter.clone(),
            class: self.class,
        }))
    }
}

pub struct RouteRateLimitMiddleware<S> {
    service: Rc<S>,
    rate_limiter: Rc<RateLimiter>,
    class: RouteClass,
}

impl<S, B> Service<ServiceRequest> for RouteRateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let rate_limiter = self.rate_limiter.clone();
        let class = self.class;

        Box::pin(async move {
            let client_ip = extract_ip(req.request());
            let decision = rate_limiter.check(class, &client_ip).await;

            if !decision.allowed {
                let mut response = AuthError::RateLimited {
                    retry_after: decision.retry_after,
                }
                .error_response();
                insert_headers(response.headers_mut(), &decision);
                return Ok(req.into_response(response).map_into_right_body());
            }

            debug!(class = %class, client_ip = %client_ip, remaining = decision.remaining, "Request within quota");

            let mut res = service.call(req).await?;
            insert_headers(res.headers_mut(), &decision);
            Ok(res.map_into_left_body())
        })
    }
}
