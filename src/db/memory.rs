use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ExecutionLogStore, ManualOutcome, QueueStore};
use crate::error::StorageError;
use crate::models::{
    EntryPage, ExecutionLogEntry, NewLogEntry, NewQueueEntry, OutcomeCounts, Pagination,
    QueueEntry, QueueFilter, QueueStatistics, QueueStatus, Transition,
};

struct Inner {
    /// Insertion order; ties on priority and created_at resolve to the earlier insert.
    entries: Vec<QueueEntry>,
    log: Vec<ExecutionLogEntry>,
    clock_offset: TimeDelta,
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

/// In-process store. Every operation runs under one lock, so claims are atomic.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
    claim_latency_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                log: Vec::new(),
                clock_offset: TimeDelta::zero(),
            }),
            available: AtomicBool::new(true),
            claim_latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails with `StorageError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every `claim_next` take at least `latency`, like a slow database round trip.
    pub fn set_claim_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.claim_latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Move the store's notion of "now" forward, making scheduled retries due.
    pub async fn advance_clock(&self, by: TimeDelta) {
        self.inner.lock().await.clock_offset += by;
    }

    /// Overwrite `processing_started_at`, e.g. to simulate a crashed worker.
    pub async fn set_processing_started_at(&self, id: Uuid, at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.find_mut(id) {
            Some(entry) => {
                entry.processing_started_at = Some(at);
                true
            }
            None => false,
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, StorageError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let now = inner.now();
        let entry = QueueEntry {
            id: Uuid::now_v7(),
            configuration_id: entry.configuration_id,
            payload: entry.payload,
            status: QueueStatus::Queued,
            priority: entry.priority,
            attempt_count: 0,
            max_attempts: entry.max_attempts,
            claimed_by: None,
            cancel_requested: false,
            last_error: None,
            result_ref: None,
            next_retry_at: None,
            processing_started_at: None,
            processing_completed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueEntry>, StorageError> {
        let latency = self.claim_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check()?;
        let mut inner = self.inner.lock().await;
        let now = inner.now();

        let index = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_eligible(now))
            .min_by_key(|(i, e)| (Reverse(e.priority), e.created_at, *i))
            .map(|(i, _)| i);

        let Some(index) = index else {
            return Ok(None);
        };

        let entry = &mut inner.entries[index];
        entry.status = QueueStatus::Processing;
        entry.attempt_count += 1;
        entry.claimed_by = Some(worker_id.to_string());
        entry.next_retry_at = None;
        entry.processing_started_at = Some(now);
        entry.processing_completed_at = None;
        entry.updated_at = now;
        Ok(Some(entry.clone()))
    }

    async fn update_status(
        &self,
        claimed: &QueueEntry,
        transition: &Transition,
    ) -> Result<Option<QueueEntry>, StorageError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let now = inner.now();
        let Some(entry) = inner.find_mut(claimed.id) else {
            return Ok(None);
        };
        if entry.status != QueueStatus::Processing
            || entry.claimed_by != claimed.claimed_by
            || entry.attempt_count != claimed.attempt_count
        {
            return Ok(None);
        }

        entry.status = transition.status;
        entry.next_retry_at = transition.next_retry_at;
        entry.last_error = transition.last_error.clone();
        entry.result_ref = transition.result_ref.clone();
        entry.claimed_by = None;
        entry.processing_completed_at = Some(now);
        entry.updated_at = now;
        Ok(Some(entry.clone()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueueEntry>, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn list_by_status(
        &self,
        filter: &QueueFilter,
        page: Pagination,
    ) -> Result<EntryPage, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut matching: Vec<&QueueEntry> =
            inner.entries.iter().filter(|e| filter.matches(e)).collect();
        matching.reverse();
        matching.sort_by_key(|e| Reverse(e.created_at));

        let total = matching.len() as i64;
        let entries = matching
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(EntryPage { entries, total })
    }

    async fn get_statistics(&self) -> Result<QueueStatistics, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut stats = QueueStatistics::default();
        for entry in &inner.entries {
            stats.add(entry.status, 1);
        }
        Ok(stats)
    }

    async fn delete_queued(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.entries.iter().position(|e| e.id == id) else {
            return Ok(ManualOutcome::NotFound);
        };
        let status = inner.entries[index].status;
        if status != QueueStatus::Queued {
            return Ok(ManualOutcome::Rejected(status));
        }
        Ok(ManualOutcome::Applied(inner.entries.remove(index)))
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let now = inner.now();
        let Some(entry) = inner.find_mut(id) else {
            return Ok(ManualOutcome::NotFound);
        };
        if entry.status != QueueStatus::Failed {
            return Ok(ManualOutcome::Rejected(entry.status));
        }

        entry.status = QueueStatus::Queued;
        entry.attempt_count = 0;
        entry.next_retry_at = None;
        entry.last_error = None;
        entry.result_ref = None;
        entry.claimed_by = None;
        entry.cancel_requested = false;
        entry.processing_started_at = None;
        entry.processing_completed_at = None;
        entry.updated_at = now;
        Ok(ManualOutcome::Applied(entry.clone()))
    }

    async fn request_cancel(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let now = inner.now();
        let Some(entry) = inner.find_mut(id) else {
            return Ok(ManualOutcome::NotFound);
        };
        if entry.status.is_terminal() {
            return Ok(ManualOutcome::Rejected(entry.status));
        }

        entry.cancel_requested = true;
        entry.updated_at = now;
        Ok(ManualOutcome::Applied(entry.clone()))
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .find(|e| e.id == id)
            .is_some_and(|e| e.cancel_requested))
    }

    async fn oldest_processing(&self) -> Result<Option<QueueEntry>, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::Processing)
            .min_by_key(|e| e.processing_started_at)
            .cloned())
    }

    async fn list_stale_processing(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut stale: Vec<QueueEntry> = inner
            .entries
            .iter()
            .filter(|e| {
                e.status == QueueStatus::Processing
                    && e.processing_started_at.is_some_and(|at| at < started_before)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|e| e.processing_started_at);
        Ok(stale)
    }

    async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut counts = OutcomeCounts::default();
        for entry in &inner.entries {
            if !entry.processing_completed_at.is_some_and(|at| at >= since) {
                continue;
            }
            match entry.status {
                QueueStatus::Published => counts.published += 1,
                QueueStatus::Failed => counts.failed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.check()
    }
}

#[async_trait]
impl ExecutionLogStore for MemoryStore {
    async fn append(&self, entry: NewLogEntry) -> Result<ExecutionLogEntry, StorageError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let mut timestamp = inner.now();
        if let Some(last) = inner
            .log
            .iter()
            .rev()
            .find(|l| l.queue_entry_id == entry.queue_entry_id)
        {
            timestamp = timestamp.max(last.timestamp);
        }

        let row = ExecutionLogEntry {
            id: Uuid::now_v7(),
            queue_entry_id: entry.queue_entry_id,
            phase: entry.phase,
            event_status: entry.event_status,
            message: entry.message,
            metadata: entry.metadata,
            duration_ms: entry.duration_ms,
            error_detail: entry.error_detail,
            timestamp,
        };
        inner.log.push(row.clone());
        Ok(row)
    }

    async fn list_for_entry(
        &self,
        queue_entry_id: Uuid,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .log
            .iter()
            .filter(|l| l.queue_entry_id == queue_entry_id)
            .cloned()
            .collect())
    }
}
