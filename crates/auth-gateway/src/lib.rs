//! Authentication and abuse-prevention gateway
//!
//! This library exposes the gateway's services and HTTP surface for the
//! binary and for integration tests.

pub mod app;
pub mod background_tasks;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
