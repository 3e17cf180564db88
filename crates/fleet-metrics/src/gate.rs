use std::sync::Arc;

use fleet_hub::Hub;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub proceed: bool,
    pub reason: String,
}

impl BudgetDecision {
    fn ok() -> Self {
        Self::ok_with_reason("ok")
    }

    fn ok_with_reason(reason: impl Into<String>) -> Self {
        Self {
            proceed: true,
            reason: reason.into(),
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            reason: reason.into(),
        }
    }
}

pub struct BudgetGate {
    hub: Arc<dyn Hub>,
}

impl BudgetGate {
    pub fn new(hub: Arc<dyn Hub>) -> Self {
        Self { hub }
    }

    /// Hub errors fail open: an activation is allowed to proceed rather
    /// than being starved by a flaky budget endpoint.
    pub async fn check(&self, agent_id: &str) -> BudgetDecision {
        let health = match self.hub.budget_health(agent_id).await {
            Ok(health) => health,
            Err(err) => {
                warn!(agent_id = %agent_id, error = %err, "budget_health_check_failed_proceeding_anyway");
                return BudgetDecision::ok_with_reason("budget check failed, proceeding anyway");
            }
        };

        if health.daily_used >= health.daily_limit {
            return BudgetDecision::blocked("Daily budget exceeded");
        }
        if health.monthly_used >= health.monthly_limit {
            return BudgetDecision::blocked("Monthly budget exceeded");
        }
        if !health.healthy {
            return BudgetDecision::blocked("Budget unhealthy");
        }
        BudgetDecision::ok()
    }
}
