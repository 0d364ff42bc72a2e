use std::sync::Arc;

use crate::db::QueueStore;
use crate::execution_log::ExecutionLog;
use crate::health::HealthMonitor;
use crate::orchestrator::Orchestrator;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub store: Arc<dyn QueueStore>,
    pub log: ExecutionLog,
    pub orchestrator: Orchestrator,
    pub health: HealthMonitor,
}
