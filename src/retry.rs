use std::time::Duration;

use crate::error::{ErrorKind, JobError};

/// Delay before attempt N+1, indexed by the attempt that just failed (1-based).
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
];

/// Floor applied when the collaborator reported a rate limit.
pub const RATE_LIMIT_MIN_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Stateless backoff and retryability policy.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    table: Vec<Duration>,
    rate_limit_floor: Duration,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self {
            table: DEFAULT_BACKOFF.to_vec(),
            rate_limit_floor: RATE_LIMIT_MIN_DELAY,
        }
    }
}

impl RetryScheduler {
    /// Custom table. An empty table means "retry immediately".
    pub fn with_table(table: Vec<Duration>, rate_limit_floor: Duration) -> Self {
        Self {
            table,
            rate_limit_floor,
        }
    }

    /// Table lookup; attempts past the end reuse the last value.
    pub fn compute_backoff(&self, attempt_number: u32) -> Duration {
        let index = attempt_number.saturating_sub(1) as usize;
        self.table
            .get(index)
            .or_else(|| self.table.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_retryable(kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::TransientService | ErrorKind::RateLimit => true,
            ErrorKind::Configuration | ErrorKind::Validation => false,
            ErrorKind::Unclassified => true,
        }
    }

    pub fn should_give_up(attempt_count: i32, max_attempts: i32) -> bool {
        attempt_count >= max_attempts
    }

    /// Delay for a retry after `attempt_number` failed with `error`.
    pub fn effective_delay(&self, attempt_number: u32, error: &JobError) -> Duration {
        let base = self.compute_backoff(attempt_number);
        match error.kind() {
            ErrorKind::RateLimit => {
                let floor = base.max(self.rate_limit_floor);
                error.retry_after().map_or(floor, |ra| floor.max(ra))
            }
            _ => base,
        }
    }

    pub fn decide(&self, attempt_count: i32, max_attempts: i32, error: &JobError) -> RetryDecision {
        let kind = error.kind();
        if kind == ErrorKind::Unclassified {
            tracing::warn!("Unclassified error treated as retryable: {error}");
        }

        if !Self::is_retryable(kind) || Self::should_give_up(attempt_count, max_attempts) {
            return RetryDecision::GiveUp;
        }

        let attempt = u32::try_from(attempt_count).unwrap_or(0);
        RetryDecision::Retry {
            delay: self.effective_delay(attempt, error),
        }
    }
}
