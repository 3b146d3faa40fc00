//! HTTP adapter over the job lifecycle.

pub mod error;
mod handlers;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::lifecycle::JobService;
use crate::infra::assets::AssetStore;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub assets: Arc<AssetStore>,
    /// Refresh cadence advertised by the pending page.
    pub pending_refresh: Duration,
    /// Ceiling for `?wait=` long-polls.
    pub max_wait: Duration,
}

pub fn build_router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/", post(handlers::submit_job))
        .route("/job/{id}", get(handlers::fetch_job))
        .route("/job/{id}/status", get(handlers::job_status))
        .route("/public/{domain}/{signal}", get(handlers::public_asset))
        .route("/_health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
