//! Router assembly.

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/jobs", routes::jobs::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
