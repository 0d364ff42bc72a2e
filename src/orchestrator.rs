use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::db::{ManualOutcome, QueueStore};
use crate::error::{JobError, StorageError};
use crate::execution_log::ExecutionLog;
use crate::models::{EventStatus, NewQueueEntry, Phase, QueueEntry, QueueStatus, Transition};
use crate::pipeline::{PipelineResult, PipelineRunner, PipelineStatus};
use crate::redact;
use crate::retry::{RetryDecision, RetryScheduler};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker_id: String,
    /// Entries run at the same time within one batch.
    pub concurrency: usize,
    pub default_max_attempts: i32,
    /// Processing entries older than this count as stuck.
    pub stale_after: Duration,
    /// Move stuck entries back into the retry flow instead of only reporting them.
    pub reap_stale: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-0".to_string(),
            concurrency: 1,
            default_max_attempts: 3,
            stale_after: Duration::from_secs(30 * 60),
            reap_stale: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub claimed: usize,
    pub published: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
    /// Results discarded because their claim no longer held the entry.
    pub lost: usize,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn error_message(phase: Option<Phase>, err: &JobError) -> String {
    match phase {
        Some(phase) => redact::short_error(&format!("{phase}: {err}")),
        None => redact::short_error(&err.to_string()),
    }
}

/// Drives claim -> run -> transition. All cross-worker coordination goes through the store's claim.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn QueueStore>,
    log: ExecutionLog,
    runner: Arc<PipelineRunner>,
    retry: RetryScheduler,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        log: ExecutionLog,
        runner: Arc<PipelineRunner>,
        retry: RetryScheduler,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            log,
            runner,
            retry,
            config,
        }
    }

    /// Same collaborators, different claim identity.
    pub fn for_worker(&self, worker_id: impl Into<String>) -> Self {
        let mut worker = self.clone();
        worker.config.worker_id = worker_id.into();
        worker
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submission entry point for the external API layer.
    pub async fn submit(
        &self,
        configuration_id: Uuid,
        payload: serde_json::Value,
        priority: i32,
    ) -> Result<Uuid, StorageError> {
        let entry = self
            .submit_entry(NewQueueEntry {
                configuration_id,
                payload,
                priority,
                max_attempts: self.config.default_max_attempts,
            })
            .await?;
        Ok(entry.id)
    }

    pub async fn submit_entry(&self, mut entry: NewQueueEntry) -> Result<QueueEntry, StorageError> {
        entry.max_attempts = entry.max_attempts.max(1);
        let entry = self.store.enqueue(entry).await?;
        tracing::debug!(
            "Enqueued entry {} (configuration={}, priority={})",
            entry.id,
            entry.configuration_id,
            entry.priority
        );
        Ok(entry)
    }

    /// Claim and process up to `max_entries`. Each claimed entry runs on its own task,
    /// so in-flight entries keep going while the next claim is awaited. A storage failure
    /// stops further claims, waits for in-flight entries, then is returned.
    pub async fn process_batch(&self, max_entries: usize) -> Result<BatchSummary, StorageError> {
        let mut summary = BatchSummary::default();
        let mut first_error: Option<StorageError> = None;
        let mut in_flight = JoinSet::new();
        let limit = self.config.concurrency.max(1);

        while summary.claimed < max_entries {
            if in_flight.len() >= limit {
                if let Some(joined) = in_flight.join_next().await {
                    Self::tally(&mut summary, &mut first_error, joined);
                }
                if first_error.is_some() {
                    break;
                }
                continue;
            }

            match self.store.claim_next(&self.config.worker_id).await {
                Ok(Some(entry)) => {
                    summary.claimed += 1;
                    let orchestrator = self.clone();
                    in_flight.spawn(async move { orchestrator.process_entry(entry).await });
                }
                Ok(None) => break,
                Err(e) => {
                    first_error = Some(e);
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            Self::tally(&mut summary, &mut first_error, joined);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn tally(
        summary: &mut BatchSummary,
        first_error: &mut Option<StorageError>,
        joined: Result<Result<Option<QueueEntry>, StorageError>, JoinError>,
    ) {
        match joined {
            Ok(Ok(Some(entry))) => match entry.status {
                QueueStatus::Published => summary.published += 1,
                QueueStatus::RetryScheduled => summary.retry_scheduled += 1,
                QueueStatus::Failed => summary.failed += 1,
                QueueStatus::Queued | QueueStatus::Processing => {}
            },
            Ok(Ok(None)) => summary.lost += 1,
            Ok(Err(e)) => match first_error {
                Some(_) => tracing::error!("Additional storage error in batch: {e}"),
                None => *first_error = Some(e),
            },
            // The entry stays in processing until the stale sweep picks it up.
            Err(e) => {
                tracing::error!("Entry task ended without a result: {e}");
                summary.lost += 1;
            }
        }
    }

    /// Run one claimed entry and persist its transition.
    /// Returns `None` when the entry was no longer ours to update.
    pub async fn process_entry(&self, entry: QueueEntry) -> Result<Option<QueueEntry>, StorageError> {
        tracing::debug!(
            "Processing entry {} (configuration={}, attempt={}/{}, worker={})",
            entry.id,
            entry.configuration_id,
            entry.attempt_count,
            entry.max_attempts,
            self.config.worker_id
        );

        let result = self.runner.run(&entry).await?;
        let transition = self.decide(&entry, &result, Utc::now());

        let Some(updated) = self.store.update_status(&entry, &transition).await? else {
            tracing::warn!(
                "Entry {} is no longer held by this claim, discarding result",
                entry.id
            );
            self.log
                .record_error(
                    entry.id,
                    "result discarded: claim no longer holds the entry",
                    Some(json!({
                        "attempt": entry.attempt_count,
                        "worker": self.config.worker_id,
                        "intended_status": transition.status,
                    })),
                )
                .await?;
            return Ok(None);
        };

        self.record_summary(&updated, &result).await?;

        match updated.status {
            QueueStatus::Published => tracing::info!("Entry {} published", updated.id),
            QueueStatus::RetryScheduled => tracing::info!(
                "Entry {} scheduled for retry at {:?} (attempt {}/{})",
                updated.id,
                updated.next_retry_at,
                updated.attempt_count,
                updated.max_attempts
            ),
            QueueStatus::Failed => tracing::warn!(
                "Entry {} failed after {} attempt(s): {}",
                updated.id,
                updated.attempt_count,
                updated.last_error.as_deref().unwrap_or("unknown error")
            ),
            QueueStatus::Queued | QueueStatus::Processing => {}
        }

        Ok(Some(updated))
    }

    /// The transition table for an entry leaving `processing`.
    pub fn decide(&self, entry: &QueueEntry, result: &PipelineResult, now: DateTime<Utc>) -> Transition {
        match result.status {
            PipelineStatus::Success => {
                let result_ref = result
                    .published
                    .as_ref()
                    .map(|p| json!(p))
                    .unwrap_or(serde_json::Value::Null);
                Transition::published(result_ref)
            }
            PipelineStatus::Cancelled => Transition::failed("cancelled by operator".to_string()),
            PipelineStatus::RetryableFailure | PipelineStatus::FatalFailure => {
                let err = result.error.clone().unwrap_or_else(|| {
                    JobError::Unclassified("pipeline failed without an error".into())
                });
                self.failure_transition(entry, result.failed_phase, &err, now)
            }
        }
    }

    fn failure_transition(
        &self,
        entry: &QueueEntry,
        phase: Option<Phase>,
        err: &JobError,
        now: DateTime<Utc>,
    ) -> Transition {
        let message = error_message(phase, err);
        match self.retry.decide(entry.attempt_count, entry.max_attempts, err) {
            RetryDecision::Retry { delay } => Transition::retry_at(after(now, delay), message),
            RetryDecision::GiveUp => Transition::failed(message),
        }
    }

    async fn record_summary(
        &self,
        entry: &QueueEntry,
        result: &PipelineResult,
    ) -> Result<(), StorageError> {
        let (phase, event_status) = match result.status {
            PipelineStatus::Success => (Some(Phase::Publish), EventStatus::Completed),
            _ => (result.failed_phase, EventStatus::Failed),
        };
        let message = format!(
            "attempt {}/{}: processing -> {}",
            entry.attempt_count, entry.max_attempts, entry.status
        );

        self.log
            .record_summary(
                entry.id,
                phase,
                event_status,
                message,
                json!({
                    "status": entry.status,
                    "attempt": entry.attempt_count,
                    "max_attempts": entry.max_attempts,
                    "next_retry_at": entry.next_retry_at,
                    "error_kind": result.error.as_ref().map(|e| e.kind()),
                    "worker": self.config.worker_id,
                }),
            )
            .await?;
        Ok(())
    }

    /// Operator delete. Only `queued` entries may be removed.
    pub async fn delete_entry(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        let outcome = self.store.delete_queued(id).await?;
        match &outcome {
            ManualOutcome::Applied(_) => tracing::info!("Entry {id} deleted by operator"),
            ManualOutcome::Rejected(status) => {
                tracing::debug!("Refused to delete entry {id} in status {status}")
            }
            ManualOutcome::NotFound => {}
        }
        Ok(outcome)
    }

    /// Operator requeue of a `failed` entry. Resets attempts.
    pub async fn requeue_entry(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        let outcome = self.store.requeue_failed(id).await?;
        if let ManualOutcome::Applied(entry) = &outcome {
            tracing::info!("Entry {id} requeued by operator");
            self.log
                .record_summary(
                    id,
                    None,
                    EventStatus::Completed,
                    "failed -> queued (operator requeue)".to_string(),
                    json!({ "status": entry.status, "attempt": entry.attempt_count }),
                )
                .await?;
        }
        Ok(outcome)
    }

    /// Ask a running or waiting entry to stop at the next phase boundary.
    pub async fn cancel_entry(&self, id: Uuid) -> Result<ManualOutcome, StorageError> {
        let outcome = self.store.request_cancel(id).await?;
        if let ManualOutcome::Applied(entry) = &outcome {
            tracing::info!("Cancellation requested for entry {id}");
            self.log
                .record_summary(
                    id,
                    None,
                    EventStatus::Started,
                    "cancellation requested by operator".to_string(),
                    json!({ "status": entry.status }),
                )
                .await?;
        }
        Ok(outcome)
    }

    /// Return stuck `processing` entries to the retry flow. No-op unless enabled.
    pub async fn reap_stale(&self) -> Result<usize, StorageError> {
        if !self.config.reap_stale {
            return Ok(0);
        }

        let now = Utc::now();
        let stale = self
            .store
            .list_stale_processing(before(now, self.config.stale_after))
            .await?;

        let mut reaped = 0;
        for entry in stale {
            let err = JobError::TransientService(format!(
                "worker {} stopped responding",
                entry.claimed_by.as_deref().unwrap_or("unknown")
            ));
            let transition = self.failure_transition(&entry, None, &err, now);

            if let Some(updated) = self.store.update_status(&entry, &transition).await? {
                tracing::warn!(
                    "Reaped stuck entry {} (started {:?}) -> {}",
                    updated.id,
                    entry.processing_started_at,
                    updated.status
                );
                self.log
                    .record_error(
                        updated.id,
                        &format!("stuck in processing, moved to {}", updated.status),
                        Some(json!({
                            "processing_started_at": entry.processing_started_at,
                            "claimed_by": entry.claimed_by,
                            "attempt": entry.attempt_count,
                        })),
                    )
                    .await?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}
