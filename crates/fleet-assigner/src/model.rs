use chrono::{DateTime, Utc};
use fleet_types::TaskType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub runner_id: String,
    pub started_at: DateTime<Utc>,
    pub task_type: TaskType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Idle,
    Busy,
    Draining,
    /// Written just before blocking on `work_queue.claim` (§4.9 claim loop),
    /// distinct from `Idle` so a health dashboard can tell "about to claim"
    /// from "claimed nothing for a while".
    Claiming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerHeartbeat {
    pub runner_id: String,
    pub status: RunnerStatus,
    pub timestamp: DateTime<Utc>,
}
