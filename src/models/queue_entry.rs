use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a queue entry. Stored as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    RetryScheduled,
    Published,
    Failed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Queued,
        QueueStatus::Processing,
        QueueStatus::RetryScheduled,
        QueueStatus::Published,
        QueueStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::RetryScheduled => "retry_scheduled",
            QueueStatus::Published => "published",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Published | QueueStatus::Failed)
    }

    /// Whether a worker may claim an entry in this state (subject to `next_retry_at`).
    pub fn is_claimable(&self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::RetryScheduled)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "processing" => Ok(QueueStatus::Processing),
            "retry_scheduled" => Ok(QueueStatus::RetryScheduled),
            "published" => Ok(QueueStatus::Published),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("Unknown queue status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub configuration_id: Uuid,
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub claimed_by: Option<String>,
    pub cancel_requested: bool,
    pub last_error: Option<String>,
    pub result_ref: Option<serde_json::Value>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Eligible for claim at `now`: claimable state, retry time reached, attempts left.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.next_retry_at.is_none_or(|at| at <= now)
            && self.attempt_count < self.max_attempts
    }
}

/// What the submission layer hands to `enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub configuration_id: Uuid,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub max_attempts: i32,
}

/// The full set of columns written when a claimed entry leaves `processing`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: QueueStatus,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result_ref: Option<serde_json::Value>,
}

impl Transition {
    pub fn published(result_ref: serde_json::Value) -> Self {
        Self {
            status: QueueStatus::Published,
            next_retry_at: None,
            last_error: None,
            result_ref: Some(result_ref),
        }
    }

    pub fn retry_at(at: DateTime<Utc>, error: String) -> Self {
        Self {
            status: QueueStatus::RetryScheduled,
            next_retry_at: Some(at),
            last_error: Some(error),
            result_ref: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: QueueStatus::Failed,
            next_retry_at: None,
            last_error: Some(error),
            result_ref: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub configuration_id: Option<Uuid>,
}

impl QueueFilter {
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        self.status.is_none_or(|s| s == entry.status)
            && self.configuration_id.is_none_or(|c| c == entry.configuration_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    /// 1-based page number; `per_page` is clamped to 1..=100.
    pub fn page(page: i64, per_page: i64) -> Self {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        Self {
            limit: per_page,
            offset: (page - 1).saturating_mul(per_page),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::page(1, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPage {
    pub entries: Vec<QueueEntry>,
    pub total: i64,
}

/// Entry counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queued: i64,
    pub processing: i64,
    pub retry_scheduled: i64,
    pub published: i64,
    pub failed: i64,
}

impl QueueStatistics {
    pub fn add(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Queued => self.queued += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::RetryScheduled => self.retry_scheduled += count,
            QueueStatus::Published => self.published += count,
            QueueStatus::Failed => self.failed += count,
        }
    }

    pub fn get(&self, status: QueueStatus) -> i64 {
        match status {
            QueueStatus::Queued => self.queued,
            QueueStatus::Processing => self.processing,
            QueueStatus::RetryScheduled => self.retry_scheduled,
            QueueStatus::Published => self.published,
            QueueStatus::Failed => self.failed,
        }
    }

    /// Entries waiting to be claimed.
    pub fn pending(&self) -> i64 {
        self.queued + self.retry_scheduled
    }

    pub fn total(&self) -> i64 {
        QueueStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Terminal outcomes completed within a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub published: i64,
    pub failed: i64,
}

impl OutcomeCounts {
    pub fn total(&self) -> i64 {
        self.published + self.failed
    }

    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.published as f64 / total as f64),
        }
    }
}
