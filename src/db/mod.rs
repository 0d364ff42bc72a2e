pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    EntryPage, ExecutionLogEntry, NewLogEntry, NewQueueEntry, OutcomeCounts, Pagination,
    QueueEntry, QueueFilter, QueueStatistics, QueueStatus, Transition,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of an operator-initiated change.
#[derive(Debug, Clone)]
pub enum ManualOutcome {
    Applied(QueueEntry),
    NotFound,
    /// The entry exists but its current status forbids the change.
    Rejected(QueueStatus),
}

/// Durable queue storage. `claim_next` and `update_status` are each a single atomic write.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert with status=queued and attempt_count=0.
    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, StorageError>;

    /// Claim the highest-priority, oldest eligible entry for `worker_id`.
    /// Increments `attempt_count`. Concurrent callers never receive the same entry.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueEntry>, StorageError>;

    /// Write a transition out of `processing` for the claim `claimed` was returned from.
    /// Returns `None` if that claim no longer holds the entry: it left `processing`,
    /// or was re-claimed (different `claimed_by` or `attempt_count`).
    async fn update_status(
        &self,
        claimed: &QueueEntry,
        transition: &Transition,
    ) -> Result<Option<QueueEntry>, StorageError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueueEntry>, StorageError>;

    /// Newest first.
    async fn list_by_status(
        &self,
        filter: &QueueFilter,
        page: Pagination,
    ) -> Result<EntryPage, StorageError>;

    async fn get_statistics(&self) -> Result<QueueStatistics, StorageError>;

    /// Delete an entry; only allowed while `queued`.
    async fn delete_queued(&self, id: Uuid) -> Result<ManualOutcome, StorageError>;

    /// `failed` -> `queued`, resetting attempt_count to 0.
    async fn requeue_failed(&self, id: Uuid) -> Result<ManualOutcome, StorageError>;

    /// Set the cooperative cancellation flag on a non-terminal entry.
    async fn request_cancel(&self, id: Uuid) -> Result<ManualOutcome, StorageError>;

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, StorageError>;

    /// The `processing` entry with the earliest `processing_started_at`.
    async fn oldest_processing(&self) -> Result<Option<QueueEntry>, StorageError>;

    async fn list_stale_processing(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, StorageError>;

    /// Terminal outcomes with `processing_completed_at >= since`.
    async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, StorageError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Append-only audit storage.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    async fn append(&self, entry: NewLogEntry) -> Result<ExecutionLogEntry, StorageError>;

    /// Chronological, insertion order breaking timestamp ties.
    async fn list_for_entry(
        &self,
        queue_entry_id: Uuid,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError>;
}
