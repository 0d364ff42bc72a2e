use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::health::{HealthReport, HealthStatus};
use crate::state::SharedState;

pub async fn report(State(state): State<SharedState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.report().await;
    let status = match report.overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
