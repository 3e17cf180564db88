use std::collections::HashMap;
use std::sync::Arc;

use fleet_sandbox::ActivationExecutor;
use fleet_types::AgentType;

/// Dynamic dispatch is a lookup from the closed `AgentType` tag to one of a
/// fixed set of executors (§9 "Dynamic dispatch / strategy selection").
/// Core runner behavior is identical regardless of which executor a tag
/// resolves to.
#[derive(Clone)]
pub struct ExecutorRegistry {
    by_type: HashMap<AgentType, Arc<dyn ActivationExecutor>>,
    default_executor: Arc<dyn ActivationExecutor>,
}

impl ExecutorRegistry {
    pub fn new(default_executor: Arc<dyn ActivationExecutor>) -> Self {
        Self {
            by_type: HashMap::new(),
            default_executor,
        }
    }

    pub fn with_executor(mut self, agent_type: AgentType, executor: Arc<dyn ActivationExecutor>) -> Self {
        self.by_type.insert(agent_type, executor);
        self
    }

    pub fn resolve(&self, agent_type: AgentType) -> Arc<dyn ActivationExecutor> {
        self.by_type
            .get(&agent_type)
            .cloned()
            .unwrap_or_else(|| self.default_executor.clone())
    }
}
