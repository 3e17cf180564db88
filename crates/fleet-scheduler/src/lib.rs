//! Stateless scheduling helper (§4.6). Used by runners as a fallback path
//! when the work queue is unreachable: it turns a Hub poll result directly
//! into a candidate `WorkItem`, honoring locks and budget gates itself
//! since nothing else will.

mod error;

pub use error::SchedulerError;

use std::sync::Arc;
use std::time::Duration;

use fleet_hub::Hub;
use fleet_store::{lock_key, StoreBackend};
use fleet_types::{Priority, TaskType, WorkItem};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    Notification,
    Exploration,
    Hybrid,
}

pub struct Scheduler {
    hub: Arc<dyn Hub>,
    store: Arc<dyn StoreBackend>,
}

impl Scheduler {
    pub fn new(hub: Arc<dyn Hub>, store: Arc<dyn StoreBackend>) -> Self {
        Self { hub, store }
    }

    pub async fn get_next_assignment(
        &self,
        mode: SchedulingMode,
        min_staleness: Duration,
    ) -> Result<Option<WorkItem>, SchedulerError> {
        match mode {
            SchedulingMode::Notification => self.next_from_notifications().await,
            SchedulingMode::Exploration => self.next_from_stale(min_staleness).await,
            SchedulingMode::Hybrid => {
                if let Some(item) = self.next_from_notifications().await? {
                    return Ok(Some(item));
                }
                self.next_from_stale(min_staleness).await
            }
        }
    }

    /// Hub sorts by `notification_count` descending; return the first
    /// unlocked agent, preserving that order.
    async fn next_from_notifications(&self) -> Result<Option<WorkItem>, SchedulerError> {
        let agents = self.hub.list_notified_agents().await?;
        for agent in agents {
            if !self.store.exists(&lock_key(&agent.id)).await? {
                return Ok(Some(WorkItem::new(
                    agent.id,
                    agent.name,
                    TaskType::Inbox,
                    Priority::High,
                    agent.notification_count,
                )));
            }
        }
        Ok(None)
    }

    /// Hub sorts by staleness ascending-of-freshness (oldest activation
    /// first); return the first agent that is unlocked and budget-healthy.
    /// A budget-health check failure fails open with a warning — a stale
    /// agent should not starve because the budget endpoint is flaky.
    async fn next_from_stale(&self, min_staleness: Duration) -> Result<Option<WorkItem>, SchedulerError> {
        let agents = self.hub.list_stale_agents(min_staleness).await?;
        for agent in agents {
            if self.store.exists(&lock_key(&agent.id)).await? {
                continue;
            }
            let healthy = match self.hub.budget_health(&agent.id).await {
                Ok(health) => health.healthy,
                Err(err) => {
                    warn!(agent_id = %agent.id, error = %err, "budget_health_check_failed_failing_open");
                    true
                }
            };
            if healthy {
                return Ok(Some(WorkItem::new(
                    agent.id,
                    agent.name,
                    TaskType::Discovery,
                    Priority::Normal,
                    0,
                )));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_hub::{BudgetHealth, ConsumptionReport, HubError, NotificationAgent, StaleAgent};
    use fleet_store::InMemoryBackend;
    use std::sync::Mutex;

    struct FakeHub {
        notified: Vec<NotificationAgent>,
        stale: Vec<StaleAgent>,
        unhealthy: Vec<String>,
        budget_errors: Vec<String>,
        budget_calls: Mutex<Vec<String>>,
    }

    impl Default for FakeHub {
        fn default() -> Self {
            Self {
                notified: Vec::new(),
                stale: Vec::new(),
                unhealthy: Vec::new(),
                budget_errors: Vec::new(),
                budget_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Hub for FakeHub {
        async fn poll_notifications(&self, _batch_size: u32) -> Result<Option<Vec<NotificationAgent>>, HubError> {
            Ok(Some(self.notified.clone()))
        }

        async fn list_notified_agents(&self) -> Result<Vec<NotificationAgent>, HubError> {
            Ok(self.notified.clone())
        }

        async fn list_stale_agents(&self, _min_staleness: Duration) -> Result<Vec<StaleAgent>, HubError> {
            Ok(self.stale.clone())
        }

        async fn mark_activated(&self, _agent_id: &str) -> Result<(), HubError> {
            Ok(())
        }

        async fn budget_health(&self, agent_id: &str) -> Result<BudgetHealth, HubError> {
            self.budget_calls.lock().unwrap().push(agent_id.to_string());
            if self.budget_errors.contains(&agent_id.to_string()) {
                return Err(HubError::Status(503));
            }
            Ok(BudgetHealth {
                daily_limit: 10.0,
                daily_used: 1.0,
                monthly_limit: 100.0,
                monthly_used: 10.0,
                healthy: !self.unhealthy.contains(&agent_id.to_string()),
            })
        }

        async fn report_consumption(&self, _report: ConsumptionReport<'_>) -> Result<(), HubError> {
            Ok(())
        }
    }

    fn notification(id: &str, count: u32) -> NotificationAgent {
        NotificationAgent {
            id: id.to_string(),
            name: format!("Agent {id}"),
            notification_count: count,
        }
    }

    fn stale(id: &str) -> StaleAgent {
        StaleAgent {
            id: id.to_string(),
            name: format!("Agent {id}"),
            last_activated_at: None,
        }
    }

    #[tokio::test]
    async fn notification_path_returns_first_unlocked_agent() {
        let hub = Arc::new(FakeHub {
            notified: vec![notification("a1", 5), notification("a2", 2)],
            ..Default::default()
        });
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        store
            .set(&lock_key("a1"), "runner-x", Some(Duration::from_secs(60)), true)
            .await
            .unwrap();

        let scheduler = Scheduler::new(hub, store);
        let item = scheduler
            .get_next_assignment(SchedulingMode::Notification, Duration::from_secs(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.agent_id, "a2");
        assert_eq!(item.priority, Priority::High);
    }

    #[tokio::test]
    async fn exploration_path_skips_unhealthy_budget() {
        let hub = Arc::new(FakeHub {
            stale: vec![stale("a1"), stale("a2")],
            unhealthy: vec!["a1".to_string()],
            ..Default::default()
        });
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let scheduler = Scheduler::new(hub, store);

        let item = scheduler
            .get_next_assignment(SchedulingMode::Exploration, Duration::from_secs(3600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.agent_id, "a2");
        assert_eq!(item.task_type, TaskType::Discovery);
        assert_eq!(item.priority, Priority::Normal);
    }

    #[tokio::test]
    async fn exploration_path_fails_open_on_budget_error() {
        let hub = Arc::new(FakeHub {
            stale: vec![stale("a1")],
            budget_errors: vec!["a1".to_string()],
            ..Default::default()
        });
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let scheduler = Scheduler::new(hub, store);

        let item = scheduler
            .get_next_assignment(SchedulingMode::Exploration, Duration::from_secs(3600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.agent_id, "a1");
    }

    #[tokio::test]
    async fn hybrid_falls_back_to_exploration_when_no_notifications() {
        let hub = Arc::new(FakeHub {
            stale: vec![stale("a1")],
            ..Default::default()
        });
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let scheduler = Scheduler::new(hub, store);

        let item = scheduler
            .get_next_assignment(SchedulingMode::Hybrid, Duration::from_secs(3600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.task_type, TaskType::Discovery);
    }

    #[tokio::test]
    async fn no_candidates_returns_none() {
        let hub = Arc::new(FakeHub::default());
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let scheduler = Scheduler::new(hub, store);
        let item = scheduler
            .get_next_assignment(SchedulingMode::Hybrid, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(item.is_none());
    }
}
