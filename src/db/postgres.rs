use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ExecutionLogStore, ManualOutcome, QueueStore};
use crate::error::StorageError;
use crate::models::{
    EntryPage, ExecutionLogEntry, NewLogEntry, NewQueueEntry, OutcomeCounts, Pagination, Phase,
    QueueEntry, QueueFilter, QueueStatistics, QueueStatus, Transition,
};

const ENTRY_COLUMNS: &str = "id, configuration_id, payload, status, priority, attempt_count, \
     max_attempts, claimed_by, cancel_requested, last_error, result_ref, next_retry_at, \
     processing_started_at, processing_completed_at, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, queue_entry_id, phase, event_status, message, metadata, duration_ms, error_detail, created_at";

#[derive(Debug, sqlx::FromRow)]
struct QueueEntryRow {
    id: Uuid,
    configuration_id: Uuid,
    payload: serde_json::Value,
    status: String,
    priority: i32,
    attempt_count: i32,
    max_attempts: i32,
    claimed_by: Option<String>,
    cancel_requested: bool,
    last_error: Option<String>,
    result_ref: Option<serde_json::Value>,
    next_retry_at: Option<DateTime<Utc>>,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = StorageError;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            id: row.id,
            configuration_id: row.configuration_id,
            payload: row.payload,
            status: row.status.parse().map_err(StorageError::Corrupt)?,
            priority: row.priority,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            claimed_by: row.claimed_by,
            cancel_requested: row.cancel_requested,
            last_error: row.last_error,
            result_ref: row.result_ref,
            next_retry_at: row.next_retry_at,
            processing_started_at: row.processing_started_at,
            processing_completed_at: row.processing_completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    queue_entry_id: Uuid,
    phase: Option<String>,
    event_status: String,
    message: String,
    metadata: Option<serde_json::Value>,
    duration_ms: Option<i64>,
    error_detail: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for ExecutionLogEntry {
    type Error = StorageError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(ExecutionLogEntry {
            id: row.id,
            queue_entry_id: row.queue_entry_id,
            phase: row
                .phase
                .map(|p| p.parse::<Phase>())
                .transpose()
                .map_err(StorageError::Corrupt)?,
            event_status: row.event_status.parse().map_err(StorageError::Corrupt)?,
            message: row.message,
            metadata: row.metadata,
            duration_ms: row.duration_ms,
            error_detail: row.error_detail,
            timestamp: row.created_at,
        })
    }
}

fn convert(row: Option<QueueEntryRow>) -> Result<Option<QueueEntry>, StorageError> {
    row.map(QueueEntry::try_from).transpose()
}

/// Postgres-backed queue and execution log.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_entry(&self, id: Uuid) -> Result<Option<QueueEntry>, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        convert(row)
    }

    /// Distinguish "missing" from "wrong status" after a conditional write matched nothing.
    async fn outcome(
        &self,
        id: Uuid,
        applied: Option<QueueEntryRow>,
    ) -> Result<ManualOutcome, StorageError> {
        if let Some(entry) = convert(applied)? {
            return Ok(ManualOutcome::Applied(entry));
        }
        Ok(match self.fetch_entry(id).await? {
            Some(entry) => ManualOutcome::Rejected(entry.status),
            None => ManualOutcome::NotFound,
        })
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "INSERT INTO queue_entries (id, configuration_id, payload, priority, max_attempts)
             VALUES ($1, $2, $3, $4, $5) RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(entry.configuration_id)
        .bind(&entry.payload)
        .bind(entry.priority)
        .bind(entry.max_attempts)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    /// Atomically claim the next eligible entry using SELECT FOR UPDATE SKIP LOCKED.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueEntry>, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "UPDATE queue_entries
             SET status = 'processing',
                 attempt_count = attempt_count + 1,
                 claimed_by = $1,
                 next_retry_at = NULL,
                 processing_started_at = now(),
                 processing_completed_at = NULL,
                 updated_at = now()
             WHERE id = (
                 SELECT id FROM queue_entries
                 WHERE status IN ('queued', 'retry_scheduled')
                   AND (next_retry_at IS NULL OR next_retry_at <= now())
                   AND attempt_count < max_attempts
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             AND status IN ('queued', 'retry_scheduled')
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        convert(row)
    }

    async fn update_status(
        &self,
        claimed: &QueueEntry,
        transition: &Transition,
    ) -> Result<Option<QueueEntry>, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "UPDATE queue_entries
             SET status = $2,
                 next_retry_at = $3,
                 last_error = $4,
                 result_ref = $5,
                 claimed_by = NULL,
                 processing_completed_at = now(),
                 updated_at = now()
             WHERE id = $1
               AND status = 'processing'
               AND claimed_by IS NOT DISTINCT FROM $6
               AND attempt_count = $7
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(claimed.id)
        .bind(transition.status.as_str())
        .bind(transition.next_retry_at)
        .bind(&transition.last_error)
        .bind(&transition.result_ref)
        .bind(&claimed.claimed_by)
        .bind(claimed.attempt_count)
        .fetch_optional(&self.pool)
        .await?;
        convert(row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueueEntry>, StorageError> {
        self.fetch_entry(id).await
    }

    async fn list_by_status(
        &self,
        filter: &QueueFilter,
        page: Pagination,
    ) -> Result<EntryPage, StorageError> {
        let status = filter.status.map(|s| s.as_str());

        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::uuid IS NULL OR configuration_id = $2)
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(status)
        .bind(filter.configuration_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_entries
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::uuid IS NULL OR configuration_id = $2)",
        )
        .bind(status)
        .bind(filter.configuration_id)
        .fetch_one(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(QueueEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EntryPage { entries, total })
    }

    async fn get_statistics(&self) -> Result<QueueStatistics, StorageError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM queue_entries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStatistics::default();
        for (status, count) in rows {
            let status: QueueStatus = status.parse().map_err(StorageError::Corrupt)?;
            stats.add(status, count);
        }
        Ok(stats)
    }

    async fn delete_queued(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "DELETE FROM queue_entries WHERE id = $1 AND status = 'queued'
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.outcome(id, row).await
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "UPDATE queue_entries
             SET status = 'queued',
                 attempt_count = 0,
                 next_retry_at = NULL,
                 last_error = NULL,
                 result_ref = NULL,
                 claimed_by = NULL,
                 cancel_requested = FALSE,
                 processing_started_at = NULL,
                 processing_completed_at = NULL,
                 updated_at = now()
             WHERE id = $1 AND status = 'failed'
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.outcome(id, row).await
    }

    async fn request_cancel(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "UPDATE queue_entries SET cancel_requested = TRUE, updated_at = now()
             WHERE id = $1 AND status IN ('queued', 'processing', 'retry_scheduled')
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.outcome(id, row).await
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, StorageError> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM queue_entries WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    async fn oldest_processing(&self) -> Result<Option<QueueEntry>, StorageError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE status = 'processing'
             ORDER BY processing_started_at ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        convert(row)
    }

    async fn list_stale_processing(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries
             WHERE status = 'processing' AND processing_started_at < $1
             ORDER BY processing_started_at ASC"
        ))
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, StorageError> {
        let (published, failed) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*) FILTER (WHERE status = 'published'),
                    COUNT(*) FILTER (WHERE status = 'failed')
             FROM queue_entries WHERE processing_completed_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(OutcomeCounts { published, failed })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionLogStore for PgStore {
    async fn append(&self, entry: NewLogEntry) -> Result<ExecutionLogEntry, StorageError> {
        let row = sqlx::query_as::<_, LogRow>(&format!(
            "INSERT INTO execution_log
                 (id, queue_entry_id, phase, event_status, message, metadata, duration_ms, error_detail)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {LOG_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(entry.queue_entry_id)
        .bind(entry.phase.map(|p| p.as_str()))
        .bind(entry.event_status.as_str())
        .bind(&entry.message)
        .bind(&entry.metadata)
        .bind(entry.duration_ms)
        .bind(&entry.error_detail)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn list_for_entry(
        &self,
        queue_entry_id: Uuid,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        let rows = sqlx::query_as::<_, LogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM execution_log WHERE queue_entry_id = $1
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(queue_entry_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExecutionLogEntry::try_from).collect()
    }
}
