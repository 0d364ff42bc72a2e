use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::QueueStore;
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Age after which a `processing` entry is reported as stuck.
    pub stale_after: Duration,
    /// Rolling window for the success rate.
    pub window: Duration,
    /// Waiting entries (queued + retry_scheduled) above which the queue is degraded.
    pub depth_warning: i64,
    /// Success rate below which the pipeline is degraded.
    pub min_success_rate: f64,
    /// Outcomes needed before the success rate is judged.
    pub min_samples: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(30 * 60),
            window: Duration::from_secs(24 * 60 * 60),
            depth_warning: 100,
            min_success_rate: 0.5,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl HealthCheck {
    fn new(name: &str, status: HealthStatus, message: String, details: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub checks: Vec<HealthCheck>,
}

/// Read-only diagnostics. Reports stuck entries but never changes them.
#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn QueueStore>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn QueueStore>, config: HealthConfig) -> Self {
        Self { store, config }
    }

    pub async fn report(&self) -> HealthReport {
        let now = Utc::now();

        if let Err(e) = self.store.ping().await {
            tracing::error!("Health probe failed: {e}");
            let check = HealthCheck::new(
                "storage",
                HealthStatus::Unhealthy,
                format!("storage unreachable: {e}"),
                serde_json::Value::Null,
            );
            return HealthReport {
                overall_status: HealthStatus::Unhealthy,
                checked_at: now,
                checks: vec![check],
            };
        }

        let checks = vec![
            HealthCheck::new(
                "storage",
                HealthStatus::Healthy,
                "storage reachable".to_string(),
                serde_json::Value::Null,
            ),
            self.queue_depth().await,
            self.stuck_entries(now).await,
            self.success_rate(now).await,
        ];

        let overall_status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            overall_status,
            checked_at: now,
            checks,
        }
    }

    async fn queue_depth(&self) -> HealthCheck {
        let stats = match self.store.get_statistics().await {
            Ok(stats) => stats,
            Err(e) => return storage_failure("queue_depth", e),
        };

        let details = json!({
            "queued": stats.queued,
            "processing": stats.processing,
            "retry_scheduled": stats.retry_scheduled,
            "published": stats.published,
            "failed": stats.failed,
        });
        let pending = stats.pending();

        if pending > self.config.depth_warning {
            HealthCheck::new(
                "queue_depth",
                HealthStatus::Degraded,
                format!("{pending} entries waiting (threshold {})", self.config.depth_warning),
                details,
            )
        } else {
            HealthCheck::new(
                "queue_depth",
                HealthStatus::Healthy,
                format!("{pending} entries waiting"),
                details,
            )
        }
    }

    async fn stuck_entries(&self, now: DateTime<Utc>) -> HealthCheck {
        let oldest = match self.store.oldest_processing().await {
            Ok(oldest) => oldest,
            Err(e) => return storage_failure("stuck_processing", e),
        };

        let Some(entry) = oldest else {
            return HealthCheck::new(
                "stuck_processing",
                HealthStatus::Healthy,
                "no entries processing".to_string(),
                serde_json::Value::Null,
            );
        };

        let started = entry.processing_started_at.unwrap_or(entry.updated_at);
        let age = now.signed_duration_since(started).max(TimeDelta::zero());
        let age_secs = age.num_seconds();
        let threshold = self.config.stale_after.as_secs() as i64;
        let details = json!({
            "oldest_entry_id": entry.id,
            "age_secs": age_secs,
            "claimed_by": entry.claimed_by,
            "threshold_secs": threshold,
        });

        if age_secs > threshold {
            tracing::warn!(
                "Entry {} has been processing for {age_secs}s, worker may have crashed",
                entry.id
            );
            HealthCheck::new(
                "stuck_processing",
                HealthStatus::Degraded,
                format!("oldest processing entry is {age_secs}s old"),
                details,
            )
        } else {
            HealthCheck::new(
                "stuck_processing",
                HealthStatus::Healthy,
                format!("oldest processing entry is {age_secs}s old"),
                details,
            )
        }
    }

    async fn success_rate(&self, now: DateTime<Utc>) -> HealthCheck {
        let since = TimeDelta::from_std(self.config.window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let counts = match self.store.outcome_counts(since).await {
            Ok(counts) => counts,
            Err(e) => return storage_failure("success_rate", e),
        };

        let details = json!({
            "published": counts.published,
            "failed": counts.failed,
            "window_secs": self.config.window.as_secs(),
        });

        match counts.success_rate() {
            Some(rate) if counts.total() >= self.config.min_samples
                && rate < self.config.min_success_rate =>
            {
                HealthCheck::new(
                    "success_rate",
                    HealthStatus::Degraded,
                    format!("success rate {:.0}% over {} outcomes", rate * 100.0, counts.total()),
                    details,
                )
            }
            Some(rate) => HealthCheck::new(
                "success_rate",
                HealthStatus::Healthy,
                format!("success rate {:.0}% over {} outcomes", rate * 100.0, counts.total()),
                details,
            ),
            None => HealthCheck::new(
                "success_rate",
                HealthStatus::Healthy,
                "no completed entries in window".to_string(),
                details,
            ),
        }
    }
}

fn storage_failure(name: &str, err: StorageError) -> HealthCheck {
    tracing::error!("Health check {name} failed: {err}");
    HealthCheck::new(
        name,
        HealthStatus::Unhealthy,
        format!("storage error: {err}"),
        serde_json::Value::Null,
    )
}

