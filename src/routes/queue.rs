use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::ManualOutcome;
use crate::error::AppError;
use crate::models::{ExecutionLogEntry, Pagination, QueueEntry, QueueFilter, QueueStatistics, QueueStatus};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub configuration_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn list(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<QueueStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let filter = QueueFilter {
        status,
        configuration_id: params.configuration_id,
    };

    let result = state
        .store
        .list_by_status(&filter, Pagination::page(page, per_page))
        .await?;

    Ok(Json(serde_json::json!({
        "entries": result.entries,
        "total": result.total,
        "page": page,
        "per_page": per_page,
        "total_pages": (result.total as f64 / per_page as f64).ceil() as i64,
    })))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntry>, AppError> {
    let entry = state
        .store
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue entry not found".to_string()))?;
    Ok(Json(entry))
}

/// The log outlives a deleted entry, so only an id with neither is a 404.
pub async fn log(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ExecutionLogEntry>>, AppError> {
    let entries = state.log.get_log(id).await?;
    if entries.is_empty() && state.store.get_by_id(id).await?.is_none() {
        return Err(AppError::NotFound("Queue entry not found".to_string()));
    }
    Ok(Json(entries))
}

pub async fn stats(State(state): State<SharedState>) -> Result<Json<QueueStatistics>, AppError> {
    Ok(Json(state.store.get_statistics().await?))
}

pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.orchestrator.delete_entry(id).await? {
        ManualOutcome::Applied(_) => Ok(Json(serde_json::json!({ "message": "Deleted" }))),
        outcome => Err(rejection(outcome, "delete", "queued")),
    }
}

pub async fn requeue(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntry>, AppError> {
    match state.orchestrator.requeue_entry(id).await? {
        ManualOutcome::Applied(entry) => Ok(Json(entry)),
        outcome => Err(rejection(outcome, "requeue", "failed")),
    }
}

pub async fn cancel(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntry>, AppError> {
    match state.orchestrator.cancel_entry(id).await? {
        ManualOutcome::Applied(entry) => Ok(Json(entry)),
        outcome => Err(rejection(outcome, "cancel", "not terminal")),
    }
}

fn rejection(outcome: ManualOutcome, action: &str, required: &str) -> AppError {
    match outcome {
        ManualOutcome::NotFound => AppError::NotFound("Queue entry not found".to_string()),
        ManualOutcome::Rejected(status) => AppError::Conflict(format!(
            "Cannot {action} entry in status '{status}' (must be {required})"
        )),
        ManualOutcome::Applied(_) => AppError::Internal(format!("{action} outcome misrouted")),
    }
}
