//! Saga orchestrator service.
//!
//! Serves `POST /sagas` and `GET /sagas/{id}` over HTTP, consumes leaf
//! status events and `saga.command` from the message bus, and hosts the NPC
//! conversation runtime that suspends on the sagas it creates. Structured
//! logging comes from `tracing`; metrics are scraped from `/metrics`.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod service;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::sagas::AppState;

pub use config::{Config, LogFormat};
pub use error::{ApiError, StartupError};
pub use service::Service;

/// Creates the router with every route and the shared state.
pub fn create_app<S: SagaStore + 'static>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", post(routes::sagas::create::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
