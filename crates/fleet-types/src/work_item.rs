use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Inbox,
    Discovery,
}

/// Three dispatch lanes. Ordering between variants matters: `High` must
/// sort before `Normal`, which must sort before `Low` — `fleet-queue`
/// relies on `Priority::lanes()` rather than this derive, but keep the
/// declaration order aligned so a reader's intuition matches behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Store key suffix for this lane's list, e.g. `"high"`.
    pub fn lane_name(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// All lanes in strict dispatch order (highest priority first).
    pub fn all_in_order() -> [Priority; 3] {
        [Priority::High, Priority::Normal, Priority::Low]
    }
}

/// Immutable once enqueued. Carries everything a claiming runner needs to
/// know before it has loaded the agent's config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub agent_id: String,
    pub agent_name: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub inbox_count: u32,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        task_type: TaskType,
        priority: Priority,
        inbox_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            task_type,
            priority,
            inbox_count,
            created_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Derived from a `WorkItem` the instant a runner claims it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub agent_id: String,
    pub agent_name: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub inbox_count: u32,
    pub created_at: DateTime<Utc>,
    pub claimed_by: String,
    pub claimed_at: DateTime<Utc>,
}

impl Assignment {
    pub fn from_claim(item: WorkItem, claimed_by: impl Into<String>) -> Self {
        Self {
            id: item.id,
            agent_id: item.agent_id,
            agent_name: item.agent_name,
            task_type: item.task_type,
            priority: item.priority,
            inbox_count: item.inbox_count,
            created_at: item.created_at,
            claimed_by: claimed_by.into(),
            claimed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_through_json() {
        let item = WorkItem::new("agent-1", "Agent One", TaskType::Inbox, Priority::High, 5);
        let raw = item.to_json().unwrap();
        let back = WorkItem::from_json(&raw).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn lane_order_is_strictly_high_normal_low() {
        let order = Priority::all_in_order();
        assert_eq!(order, [Priority::High, Priority::Normal, Priority::Low]);
    }

    proptest! {
        #[test]
        fn work_item_json_round_trip_prop(
            agent_id in "[a-z0-9-]{1,16}",
            name in "[A-Za-z ]{1,16}",
            inbox_count in 0u32..10_000,
        ) {
            let item = WorkItem::new(agent_id, name, TaskType::Discovery, Priority::Low, inbox_count);
            let raw = item.to_json().unwrap();
            let back = WorkItem::from_json(&raw).unwrap();
            prop_assert_eq!(item, back);
        }
    }
}
