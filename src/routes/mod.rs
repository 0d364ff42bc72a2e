pub mod health;
pub mod queue;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/stats", get(queue::stats))
        .route("/api/v1/queue", get(queue::list))
        .route("/api/v1/queue/{id}", get(queue::get).delete(queue::delete))
        .route("/api/v1/queue/{id}/log", get(queue::log))
        .route("/api/v1/queue/{id}/requeue", post(queue::requeue))
        .route("/api/v1/queue/{id}/cancel", post(queue::cancel))
}

pub fn health_routes() -> Router<SharedState> {
    Router::new().route("/health", get(health::report))
}
