use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::app::services::AppServices;
use crate::middleware;

pub mod agent;
pub mod jobs;
pub mod messages;
pub mod system;

/// Full route table. Only the job-creating routes go through admission.
pub fn router(services: Arc<AppServices>) -> Router {
    let admitted = Router::new()
        .route("/agent/run", post(agent::run))
        .route("/agent/run/stream", post(agent::run_stream))
        .route_layer(axum::middleware::from_fn_with_state(
            services,
            middleware::admission_middleware,
        ));

    Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/messages", get(messages::list))
        .merge(admitted)
}
