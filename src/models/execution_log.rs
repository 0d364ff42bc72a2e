use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Structure,
    Content,
    Assets,
    Organize,
    Publish,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Validate,
        Phase::Structure,
        Phase::Content,
        Phase::Assets,
        Phase::Organize,
        Phase::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validate => "validate",
            Phase::Structure => "structure",
            Phase::Content => "content",
            Phase::Assets => "assets",
            Phase::Organize => "organize",
            Phase::Publish => "publish",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ORDER
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown phase: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Started => "started",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(EventStatus::Started),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(format!("Unknown event status: {other}")),
        }
    }
}

/// One immutable audit row. `phase` is absent for entry-level events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub queue_entry_id: Uuid,
    pub phase: Option<Phase>,
    pub event_status: EventStatus,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A log row before the store assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub queue_entry_id: Uuid,
    pub phase: Option<Phase>,
    pub event_status: EventStatus,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub error_detail: Option<String>,
}
