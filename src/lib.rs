pub mod config;
pub mod db;
pub mod error;
pub mod execution_log;
pub mod health;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod redact;
pub mod retry;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::db::{ExecutionLogStore, QueueStore};
use crate::execution_log::ExecutionLog;
use crate::health::{HealthConfig, HealthMonitor};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::pipeline::services::Collaborators;
use crate::pipeline::{PipelineConfig, PipelineRunner};
use crate::retry::RetryScheduler;
use crate::state::{AppState, SharedState};

/// Tunables for the assembled system.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub pipeline: PipelineConfig,
    pub health: HealthConfig,
    pub retry: RetryScheduler,
}

/// Wire the store, collaborators, runner, orchestrator and health monitor together.
pub fn build_state<S>(store: Arc<S>, services: Collaborators, settings: Settings) -> SharedState
where
    S: QueueStore + ExecutionLogStore + 'static,
{
    let queue: Arc<dyn QueueStore> = store.clone();
    let log = ExecutionLog::new(store as Arc<dyn ExecutionLogStore>);

    let runner = Arc::new(PipelineRunner::new(
        services,
        log.clone(),
        queue.clone(),
        settings.pipeline,
    ));
    let orchestrator = Orchestrator::new(
        queue.clone(),
        log.clone(),
        runner,
        settings.retry,
        settings.orchestrator,
    );
    let health = HealthMonitor::new(queue.clone(), settings.health);

    Arc::new(AppState {
        store: queue,
        log,
        orchestrator,
        health,
    })
}

/// The read-only reporting and operator surface.
pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .merge(routes::health_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("cache-control"),
                    HeaderValue::from_static("no-store"),
                )),
        )
        .with_state(state)
}
