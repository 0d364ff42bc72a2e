use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::db::ExecutionLogStore;
use crate::error::{JobError, StorageError};
use crate::models::{EventStatus, ExecutionLogEntry, NewLogEntry, Phase};
use crate::redact;

/// How a phase ended, for `record_phase_end`.
pub enum PhaseEnd<'a> {
    Output(&'a Value),
    Error(&'a JobError),
}

/// Append-only audit trail. Metadata is masked before it reaches storage.
#[derive(Clone)]
pub struct ExecutionLog {
    store: Arc<dyn ExecutionLogStore>,
}

impl ExecutionLog {
    pub fn new(store: Arc<dyn ExecutionLogStore>) -> Self {
        Self { store }
    }

    pub async fn record_phase_start(
        &self,
        queue_entry_id: Uuid,
        phase: Phase,
        metadata: Option<Value>,
    ) -> Result<ExecutionLogEntry, StorageError> {
        self.write(NewLogEntry {
            queue_entry_id,
            phase: Some(phase),
            event_status: EventStatus::Started,
            message: format!("{phase} started"),
            metadata,
            duration_ms: None,
            error_detail: None,
        })
        .await
    }

    pub async fn record_phase_end(
        &self,
        queue_entry_id: Uuid,
        phase: Phase,
        duration_ms: i64,
        end: PhaseEnd<'_>,
    ) -> Result<ExecutionLogEntry, StorageError> {
        let entry = match end {
            PhaseEnd::Output(output) => NewLogEntry {
                queue_entry_id,
                phase: Some(phase),
                event_status: EventStatus::Completed,
                message: format!("{phase} completed"),
                metadata: Some(output.clone()),
                duration_ms: Some(duration_ms),
                error_detail: None,
            },
            PhaseEnd::Error(err) => NewLogEntry {
                queue_entry_id,
                phase: Some(phase),
                event_status: EventStatus::Failed,
                message: format!("{phase} failed ({})", err.kind().as_str()),
                metadata: None,
                duration_ms: Some(duration_ms),
                error_detail: Some(redact::redact_text(&err.to_string())),
            },
        };
        self.write(entry).await
    }

    /// Entry-level failure not tied to a phase.
    pub async fn record_error(
        &self,
        queue_entry_id: Uuid,
        message: &str,
        context: Option<Value>,
    ) -> Result<ExecutionLogEntry, StorageError> {
        self.write(NewLogEntry {
            queue_entry_id,
            phase: None,
            event_status: EventStatus::Failed,
            message: redact::short_error(message),
            metadata: context,
            duration_ms: None,
            error_detail: None,
        })
        .await
    }

    /// One line per processed attempt describing the resulting transition.
    pub async fn record_summary(
        &self,
        queue_entry_id: Uuid,
        phase: Option<Phase>,
        event_status: EventStatus,
        message: String,
        metadata: Value,
    ) -> Result<ExecutionLogEntry, StorageError> {
        self.write(NewLogEntry {
            queue_entry_id,
            phase,
            event_status,
            message,
            metadata: Some(metadata),
            duration_ms: None,
            error_detail: None,
        })
        .await
    }

    pub async fn get_log(&self, queue_entry_id: Uuid) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        self.store.list_for_entry(queue_entry_id).await
    }

    async fn write(&self, mut entry: NewLogEntry) -> Result<ExecutionLogEntry, StorageError> {
        entry.metadata = entry.metadata.as_ref().map(redact::mask_metadata);
        self.store.append(entry).await
    }
}
