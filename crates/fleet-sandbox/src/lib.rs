//! Opaque collaborators the runner invokes as bounded operations (Non-goal
//! c): the sandbox's own tool execution and the LLM provider/agentic-loop
//! internals are never modeled here, only their start/stop/execute shape.

mod local;
mod process_executor;

pub use local::{LocalSandbox, LocalSandboxFactory};
pub use process_executor::ProcessActivationExecutor;

use async_trait::async_trait;
use fleet_types::{ActivationResult, AgentConfig, TaskType};
use serde::{Deserialize, Serialize};

/// Everything an [`ActivationExecutor`] needs to run one bounded activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub agent_id: String,
    pub agent_name: String,
    pub task_type: TaskType,
    pub config: AgentConfig,
    /// Opaque resource caps (cpu/memory/...) forwarded from the runner's
    /// environment-derived settings. The sandbox's own enforcement of these
    /// is out of scope here (Non-goal c) — the core only carries them.
    pub resource_caps: serde_json::Value,
}

/// Lifecycle of the isolated execution environment. `start`/`stop` bracket
/// exactly one activation; the runner treats both as opaque operations.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, request: &ActivationRequest) -> anyhow::Result<Box<dyn Sandbox>>;
}

/// The step-level agentic loop, treated as a single opaque bounded
/// operation that returns a result record (Non-goal b).
#[async_trait]
pub trait ActivationExecutor: Send + Sync {
    async fn execute(&self, request: &ActivationRequest) -> anyhow::Result<ActivationResult>;
}

#[cfg(feature = "testing")]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    pub struct FakeSandbox {
        pub started: Arc<AtomicBool>,
        pub stopped: Arc<AtomicBool>,
        pub fail_start: bool,
    }

    impl Default for FakeSandbox {
        fn default() -> Self {
            Self {
                started: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                fail_start: false,
            }
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn start(&self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("simulated sandbox start failure");
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct FakeSandboxFactory {
        pub fail_start: bool,
        pub fail_create: bool,
        pub created_count: Arc<AtomicU32>,
    }

    impl Default for FakeSandboxFactory {
        fn default() -> Self {
            Self {
                fail_start: false,
                fail_create: false,
                created_count: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl SandboxFactory for FakeSandboxFactory {
        async fn create(&self, _request: &ActivationRequest) -> anyhow::Result<Box<dyn Sandbox>> {
            if self.fail_create {
                anyhow::bail!("simulated sandbox create failure");
            }
            self.created_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSandbox {
                fail_start: self.fail_start,
                ..Default::default()
            }))
        }
    }

    pub struct FakeActivationExecutor {
        pub result: ActivationResult,
        pub delay: Option<Duration>,
        pub fail: bool,
    }

    #[async_trait]
    impl ActivationExecutor for FakeActivationExecutor {
        async fn execute(&self, request: &ActivationRequest) -> anyhow::Result<ActivationResult> {
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("simulated activation executor failure");
            }
            let mut result = self.result.clone();
            result.agent_id = request.agent_id.clone();
            Ok(result)
        }
    }
}
