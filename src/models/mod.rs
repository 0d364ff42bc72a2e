pub mod execution_log;
pub mod queue_entry;

pub use execution_log::{EventStatus, ExecutionLogEntry, NewLogEntry, Phase};
pub use queue_entry::{
    EntryPage, NewQueueEntry, OutcomeCounts, Pagination, QueueEntry, QueueFilter,
    QueueStatistics, QueueStatus, Transition,
};
