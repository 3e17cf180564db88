use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_assigner::{Assigner, RunnerStatus};
use fleet_cache::{ConfigCache, ConfigLoader};
use fleet_hub::Hub;
use fleet_metrics::{BudgetGate, MetricsCollector};
use fleet_queue::WorkQueue;
use fleet_sandbox::SandboxFactory;
use fleet_scheduler::{Scheduler, SchedulingMode};
use fleet_store::StoreBackend;
use fleet_telemetry::MetricsRegistry;
use fleet_types::WorkItem;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::executors::ExecutorRegistry;
use crate::state_machine::{complete_work_item, drive_activation, ActivationCollaborators};

/// Exploration `min_staleness` used when the runner falls back to
/// `Scheduler::get_next_assignment` — matches the coordinator's own "~60s"
/// stale-agent sweep cadence so a runner working in fallback mode behaves
/// like a miniature coordinator+runner fused together.
const FALLBACK_MIN_STALENESS: Duration = Duration::from_secs(60);
/// Consecutive `work_queue.claim` errors before permanently switching to
/// the scheduler-direct fallback path, mirroring the coordinator poll
/// loop's "404 once, switch permanently to short-poll" idiom (§4.8).
const CLAIM_ERROR_FALLBACK_THRESHOLD: u32 = 3;
const CLAIM_ERROR_SLEEP: Duration = Duration::from_secs(10);
const FALLBACK_EMPTY_SLEEP: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct Runner {
    id: String,
    claim_timeout: Duration,
    activation_timeout: Duration,
    resource_caps: serde_json::Value,
    assigner: Assigner,
    work_queue: Arc<WorkQueue>,
    scheduler: Scheduler,
    config_cache: Arc<ConfigCache>,
    config_loader: Arc<dyn ConfigLoader>,
    budget_gate: BudgetGate,
    sandbox_factory: Arc<dyn SandboxFactory>,
    executors: ExecutorRegistry,
    metrics: Arc<MetricsCollector>,
    registry: Arc<MetricsRegistry>,
    current_workitem: Mutex<Option<WorkItem>>,
    claim_errors: AtomicU32,
    fallback_mode: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

#[allow(clippy::too_many_arguments)]
impl Runner {
    pub fn new(
        id: impl Into<String>,
        claim_timeout: Duration,
        lock_ttl: Duration,
        activation_timeout: Duration,
        resource_caps: serde_json::Value,
        store: Arc<dyn StoreBackend>,
        hub: Arc<dyn Hub>,
        work_queue: Arc<WorkQueue>,
        config_cache: Arc<ConfigCache>,
        config_loader: Arc<dyn ConfigLoader>,
        sandbox_factory: Arc<dyn SandboxFactory>,
        executors: ExecutorRegistry,
        registry: Arc<MetricsRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let assigner_settings = fleet_assigner::AssignerSettings {
            lock_ttl,
            activation_timeout,
            poll_interval: claim_timeout,
        };
        Self {
            id: id.into(),
            claim_timeout,
            activation_timeout,
            resource_caps,
            assigner: Assigner::new(store.clone(), hub.clone(), assigner_settings),
            work_queue,
            scheduler: Scheduler::new(hub.clone(), store),
            config_cache,
            config_loader,
            budget_gate: BudgetGate::new(hub.clone()),
            sandbox_factory,
            executors,
            metrics: Arc::new(MetricsCollector::new(hub)),
            registry,
            current_workitem: Mutex::new(None),
            claim_errors: AtomicU32::new(0),
            fallback_mode: AtomicBool::new(false),
            shutdown,
        }
    }

    /// §4.9 claim loop: heartbeat `claiming`, block on `work_queue.claim`,
    /// run the state machine to terminal on a hit, loop. Falls back to
    /// `Scheduler::get_next_assignment` after repeated claim failures.
    pub async fn run_claim_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.assigner.heartbeat(&self.id, RunnerStatus::Claiming).await {
                warn!(runner_id = %self.id, error = %err, "claiming_heartbeat_failed");
            }

            if self.fallback_mode.load(Ordering::SeqCst) {
                self.claim_via_scheduler().await;
            } else {
                self.claim_via_work_queue().await;
            }
        }
        info!(runner_id = %self.id, "claim_loop_stopped");
    }

    async fn claim_via_work_queue(&self) {
        match self.work_queue.claim(&self.id, self.claim_timeout).await {
            Ok(Some(item)) => {
                self.claim_errors.store(0, Ordering::SeqCst);
                self.run_one(item).await;
            }
            Ok(None) => {
                self.claim_errors.store(0, Ordering::SeqCst);
            }
            Err(err) => {
                let errors = self.claim_errors.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(runner_id = %self.id, error = %err, errors, "work_queue_claim_failed");
                if errors >= CLAIM_ERROR_FALLBACK_THRESHOLD {
                    warn!(runner_id = %self.id, "work_queue_unreachable_switching_to_scheduler_fallback");
                    self.fallback_mode.store(true, Ordering::SeqCst);
                }
                sleep(CLAIM_ERROR_SLEEP).await;
            }
        }
    }

    async fn claim_via_scheduler(&self) {
        match self
            .scheduler
            .get_next_assignment(SchedulingMode::Hybrid, FALLBACK_MIN_STALENESS)
            .await
        {
            Ok(Some(item)) => self.run_one(item).await,
            Ok(None) => sleep(FALLBACK_EMPTY_SLEEP).await,
            Err(err) => {
                warn!(runner_id = %self.id, error = %err, "scheduler_fallback_failed");
                sleep(FALLBACK_EMPTY_SLEEP).await;
            }
        }
    }

    /// Drives one item through the activation state machine and records
    /// every side effect the claim loop owns: current-item bookkeeping,
    /// queue completion, and the telemetry counters/histograms.
    async fn run_one(&self, item: WorkItem) {
        self.current_workitem.lock().await.replace(item.clone());
        self.registry
            .activations_in_progress
            .with_label_values(&[&self.id])
            .inc();

        let collab = ActivationCollaborators {
            runner_id: &self.id,
            assigner: &self.assigner,
            work_queue: &self.work_queue,
            config_cache: &self.config_cache,
            config_loader: self.config_loader.as_ref(),
            budget_gate: &self.budget_gate,
            sandbox_factory: self.sandbox_factory.as_ref(),
            executors: &self.executors,
            metrics: &self.metrics,
            activation_timeout: self.activation_timeout,
            resource_caps: self.resource_caps.clone(),
        };

        let outcome = drive_activation(item.clone(), &collab).await;
        self.record_metrics(&item, &outcome.result);

        if let Err(err) = complete_work_item(&self.work_queue, &item, &outcome).await {
            warn!(agent_id = %item.agent_id, error = %err, "work_queue_complete_failed");
        }

        self.registry
            .activations_in_progress
            .with_label_values(&[&self.id])
            .dec();
        self.current_workitem.lock().await.take();
    }

    fn record_metrics(&self, item: &WorkItem, result: &fleet_types::ActivationResult) {
        let task_type = task_type_label(item.task_type);
        let status = if result.success { "success" } else { "failure" };
        self.registry
            .activations_total
            .with_label_values(&[&item.agent_id, task_type, status])
            .inc();
        self.registry
            .activation_duration_seconds
            .with_label_values(&[&item.agent_id, task_type])
            .observe(result.duration.as_secs_f64());

        if let Some(model) = &result.model {
            self.registry
                .tokens_consumed_total
                .with_label_values(&[&item.agent_id, model, "input"])
                .inc_by(result.tokens_input as f64);
            self.registry
                .tokens_consumed_total
                .with_label_values(&[&item.agent_id, model, "output"])
                .inc_by(result.tokens_output as f64);
            self.registry
                .activation_cost_usd_total
                .with_label_values(&[&item.agent_id, model])
                .inc_by(result.cost_usd);
        }
    }

    /// §4.9 heartbeat loop: every 10s, `busy` while an item is claimed,
    /// `idle` otherwise. Runs independently of the claim loop.
    pub async fn run_heartbeat_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let status = if self.current_workitem.lock().await.is_some() {
                RunnerStatus::Busy
            } else {
                RunnerStatus::Idle
            };
            if let Err(err) = self.assigner.heartbeat(&self.id, status).await {
                warn!(runner_id = %self.id, error = %err, "heartbeat_failed");
            }
            self.registry
                .runner_heartbeat_timestamp
                .with_label_values(&[&self.id])
                .set(chrono::Utc::now().timestamp() as f64);
            sleep(HEARTBEAT_INTERVAL).await;
        }
        info!(runner_id = %self.id, "heartbeat_loop_stopped");
    }

    pub async fn flush_metrics(&self) -> usize {
        self.metrics.flush().await
    }

    /// Periodically aggregates pending per-activation usage into one
    /// consumption report per agent (§4.10). Runs independently of the
    /// claim/heartbeat loops so a burst of activations doesn't each pay
    /// the Hub round trip individually.
    pub async fn run_metrics_flush_loop(self: Arc<Self>, interval: Duration) {
        while !self.shutdown.load(Ordering::SeqCst) {
            sleep(interval).await;
            let flushed = self.flush_metrics().await;
            if flushed > 0 {
                info!(runner_id = %self.id, agents = flushed, "metrics_flushed");
            }
        }
        info!(runner_id = %self.id, "metrics_flush_loop_stopped");
    }
}

fn task_type_label(task_type: fleet_types::TaskType) -> &'static str {
    match task_type {
        fleet_types::TaskType::Inbox => "inbox",
        fleet_types::TaskType::Discovery => "discovery",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_cache::CacheError;
    use fleet_hub::{BudgetHealth, ConsumptionReport, HubError, NotificationAgent, StaleAgent};
    use fleet_queue::WorkQueueSettings;
    use fleet_sandbox::testing::{FakeActivationExecutor, FakeSandboxFactory};
    use fleet_store::InMemoryBackend;
    use fleet_types::{ActivationResult, AgentType, Priority, TaskType};
    use serde_json::json;

    struct FakeHub;

    #[async_trait]
    impl Hub for FakeHub {
        async fn poll_notifications(&self, _b: u32) -> Result<Option<Vec<NotificationAgent>>, HubError> {
            Ok(Some(Vec::new()))
        }
        async fn list_notified_agents(&self) -> Result<Vec<NotificationAgent>, HubError> {
            Ok(Vec::new())
        }
        async fn list_stale_agents(&self, _m: Duration) -> Result<Vec<StaleAgent>, HubError> {
            Ok(Vec::new())
        }
        async fn mark_activated(&self, _a: &str) -> Result<(), HubError> {
            Ok(())
        }
        async fn budget_health(&self, _agent_id: &str) -> Result<BudgetHealth, HubError> {
            Ok(BudgetHealth {
                daily_limit: 10.0,
                daily_used: 0.0,
                monthly_limit: 100.0,
                monthly_used: 0.0,
                healthy: true,
            })
        }
        async fn report_consumption(&self, _r: ConsumptionReport<'_>) -> Result<(), HubError> {
            Ok(())
        }
    }

    struct FakeLoader;

    #[async_trait]
    impl ConfigLoader for FakeLoader {
        async fn load(&self, _agent_id: &str) -> Result<fleet_types::AgentConfig, CacheError> {
            Ok(serde_json::from_value(json!({
                "cache_ttl": 60,
                "agent_type": "autonomous",
            }))
            .unwrap())
        }
    }

    fn runner() -> Arc<Runner> {
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let hub: Arc<dyn Hub> = Arc::new(FakeHub);
        let work_queue = Arc::new(WorkQueue::new(store.clone(), WorkQueueSettings::default()));
        let config_cache = Arc::new(ConfigCache::new(store.clone()));
        let default_executor: Arc<dyn fleet_sandbox::ActivationExecutor> = Arc::new(FakeActivationExecutor {
            result: ActivationResult {
                agent_id: String::new(),
                success: true,
                posts_created: 0,
                comments_created: 0,
                notifications_processed: 1,
                tokens_input: 10,
                tokens_output: 5,
                cost_usd: 0.0,
                duration: Duration::ZERO,
                model: Some("claude-haiku".into()),
                error_message: None,
            },
            delay: None,
            fail: false,
        });
        let executors = ExecutorRegistry::new(default_executor);

        Arc::new(Runner::new(
            "runner-1",
            Duration::from_millis(50),
            Duration::from_secs(60),
            Duration::from_secs(5),
            json!({}),
            store,
            hub,
            work_queue,
            config_cache,
            Arc::new(FakeLoader),
            Arc::new(FakeSandboxFactory::default()),
            executors,
            Arc::new(MetricsRegistry::new().unwrap()),
            Arc::new(AtomicBool::new(false)),
        ))
    }

    #[tokio::test]
    async fn run_one_clears_current_workitem_and_records_metrics() {
        let r = runner();
        let item = WorkItem::new("a1", "Agent", TaskType::Inbox, Priority::High, 1);
        r.run_one(item).await;

        assert!(r.current_workitem.lock().await.is_none());
        assert_eq!(
            r.registry
                .activations_total
                .with_label_values(&["a1", "inbox", "success"])
                .get(),
            1.0
        );
        assert_eq!(r.metrics.pending_count().await, 1);
    }

    #[tokio::test]
    async fn claim_loop_stops_promptly_once_shutdown_is_set() {
        let r = runner();
        r.shutdown.store(true, Ordering::SeqCst);
        r.clone().run_claim_loop().await;
    }

    #[tokio::test]
    async fn repeated_claim_errors_trip_scheduler_fallback() {
        // A store whose brpop always errors simulates an unreachable queue.
        struct FailingStore;
        #[async_trait]
        impl StoreBackend for FailingStore {
            async fn ping(&self) -> Result<(), fleet_store::StoreError> {
                Ok(())
            }
            async fn get(&self, _k: &str) -> Result<Option<String>, fleet_store::StoreError> {
                Ok(None)
            }
            async fn set(
                &self,
                _k: &str,
                _v: &str,
                _ttl: Option<Duration>,
                _nx: bool,
            ) -> Result<bool, fleet_store::StoreError> {
                Ok(true)
            }
            async fn delete(&self, _k: &str) -> Result<u64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn exists(&self, _k: &str) -> Result<bool, fleet_store::StoreError> {
                Ok(false)
            }
            async fn incr(&self, _k: &str) -> Result<i64, fleet_store::StoreError> {
                Ok(1)
            }
            async fn expire(&self, _k: &str, _ttl: Duration) -> Result<bool, fleet_store::StoreError> {
                Ok(true)
            }
            async fn hset(&self, _k: &str, _f: &str, _v: &str) -> Result<(), fleet_store::StoreError> {
                Ok(())
            }
            async fn hget(&self, _k: &str, _f: &str) -> Result<Option<String>, fleet_store::StoreError> {
                Ok(None)
            }
            async fn hgetall(
                &self,
                _k: &str,
            ) -> Result<std::collections::HashMap<String, String>, fleet_store::StoreError> {
                Ok(Default::default())
            }
            async fn hdel(&self, _k: &str, _f: &str) -> Result<u64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn hlen(&self, _k: &str) -> Result<u64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn hincrby(&self, _k: &str, _f: &str, _d: i64) -> Result<i64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn lpush(&self, _k: &str, _v: &str) -> Result<u64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn rpush(&self, _k: &str, _v: &str) -> Result<u64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn brpop(
                &self,
                _k: &[&str],
                _t: Duration,
            ) -> Result<Option<(String, String)>, fleet_store::StoreError> {
                Err(fleet_store::StoreError::Transient("simulated outage".into()))
            }
            async fn llen(&self, _k: &str) -> Result<u64, fleet_store::StoreError> {
                Ok(0)
            }
            async fn ltrim(&self, _k: &str, _m: usize) -> Result<(), fleet_store::StoreError> {
                Ok(())
            }
            async fn lrange(&self, _k: &str, _c: usize) -> Result<Vec<String>, fleet_store::StoreError> {
                Ok(Vec::new())
            }
            async fn scan(&self, _p: &str) -> Result<Vec<String>, fleet_store::StoreError> {
                Ok(Vec::new())
            }
            async fn eval_script(
                &self,
                _s: &str,
                _k: &[&str],
                _a: &[&str],
            ) -> Result<i64, fleet_store::StoreError> {
                Ok(0)
            }
        }

        let store: Arc<dyn StoreBackend> = Arc::new(FailingStore);
        let hub: Arc<dyn Hub> = Arc::new(FakeHub);
        let work_queue = Arc::new(WorkQueue::new(store.clone(), WorkQueueSettings::default()));
        let config_cache = Arc::new(ConfigCache::new(store.clone()));
        let default_executor: Arc<dyn fleet_sandbox::ActivationExecutor> = Arc::new(FakeActivationExecutor {
            result: ActivationResult::failure("", "unused"),
            delay: None,
            fail: false,
        });
        let r = Runner::new(
            "runner-1",
            Duration::from_millis(5),
            Duration::from_secs(60),
            Duration::from_secs(5),
            json!({}),
            store,
            hub,
            work_queue,
            config_cache,
            Arc::new(FakeLoader),
            Arc::new(FakeSandboxFactory::default()),
            ExecutorRegistry::new(default_executor),
            Arc::new(MetricsRegistry::new().unwrap()),
            Arc::new(AtomicBool::new(false)),
        );

        for _ in 0..CLAIM_ERROR_FALLBACK_THRESHOLD {
            r.claim_via_work_queue().await;
        }
        assert!(r.fallback_mode.load(Ordering::SeqCst));
        let _ = AgentType::Conversational;
    }
}
