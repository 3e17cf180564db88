use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_assigner::Assigner;
use fleet_cache::{ConfigCache, ConfigLoader};
use fleet_hub::Hub;
use fleet_queue::{EnqueueOutcome, WorkQueue};
use fleet_store::{LeaderElection, StoreBackend};
use fleet_telemetry::MetricsRegistry;
use fleet_types::{Priority, TaskType, WorkItem};
use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

/// Cadence for the leader-election refresh cycle (§4.8 leader loop).
const LEADER_LOOP_INTERVAL: Duration = Duration::from_secs(10);
const HEALTH_LOOP_INTERVAL: Duration = Duration::from_secs(30);
const STATS_LOOP_INTERVAL: Duration = Duration::from_secs(60);
const HUB_POLL_BATCH_SIZE: u32 = 50;

pub struct Coordinator {
    instance_id: String,
    store: Arc<dyn StoreBackend>,
    hub: Arc<dyn Hub>,
    work_queue: Arc<WorkQueue>,
    config_cache: Arc<ConfigCache>,
    leader_election: LeaderElection,
    assigner: Assigner,
    registry: Arc<MetricsRegistry>,
    poll_interval: Duration,
    stale_sweep_interval: Duration,
    /// Flipped permanently once the long-poll notifications endpoint has
    /// returned 404 once (§4.8: "switch permanently to short-poll").
    short_poll_fallback: AtomicBool,
    prewarmed: AtomicBool,
    shutdown: Arc<AtomicBool>,
    /// Opt-in active cleanup of a lock whose owning runner has no live
    /// heartbeat (disabled by default; see [`with_stale_lock_cleanup`]).
    ///
    /// [`with_stale_lock_cleanup`]: Coordinator::with_stale_lock_cleanup
    stale_lock_cleanup_enabled: bool,
    /// Consecutive health-check ticks (§4.8 health loop, every 30s) a lock
    /// must be seen with no live heartbeat before cleanup deletes it.
    stale_lock_cleanup_threshold: u32,
    stale_lock_strikes: Mutex<HashMap<String, u32>>,
}

#[allow(clippy::too_many_arguments)]
impl Coordinator {
    pub fn new(
        instance_id: impl Into<String>,
        leader_ttl: Duration,
        lock_ttl: Duration,
        poll_interval: Duration,
        stale_sweep_interval: Duration,
        store: Arc<dyn StoreBackend>,
        hub: Arc<dyn Hub>,
        work_queue: Arc<WorkQueue>,
        config_cache: Arc<ConfigCache>,
        registry: Arc<MetricsRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let instance_id = instance_id.into();
        let leader_election = LeaderElection::new(store.clone(), instance_id.clone(), leader_ttl);
        let assigner = Assigner::new(
            store.clone(),
            hub.clone(),
            fleet_assigner::AssignerSettings {
                lock_ttl,
                activation_timeout: Duration::from_secs(300),
                poll_interval,
            },
        );
        Self {
            instance_id,
            store,
            hub,
            work_queue,
            config_cache,
            leader_election,
            assigner,
            registry,
            poll_interval,
            stale_sweep_interval,
            short_poll_fallback: AtomicBool::new(false),
            prewarmed: AtomicBool::new(false),
            shutdown,
            stale_lock_cleanup_enabled: false,
            stale_lock_cleanup_threshold: 3,
            stale_lock_strikes: Mutex::new(HashMap::new()),
        }
    }

    /// Opt in to active stale-lock cleanup (source only warns; see the
    /// open-question resolution in the grounding ledger). A lock must be
    /// observed with no live heartbeat on `threshold` consecutive health
    /// ticks before it is force-deleted — disabled (`enabled = false`) by
    /// default.
    pub fn with_stale_lock_cleanup(mut self, enabled: bool, threshold: u32) -> Self {
        self.stale_lock_cleanup_enabled = enabled;
        self.stale_lock_cleanup_threshold = threshold.max(1);
        self
    }

    pub fn is_leader(&self) -> bool {
        self.leader_election.is_leader()
    }

    /// §4.8 step 1-2: "Leader loop": every 10s attempt/refresh leadership
    /// and publish the `coordinator_is_leader` gauge. Also owns the
    /// leader-only prewarm-on-election step (§4.8 step 4).
    pub async fn run_leader_loop(self: Arc<Self>, loader: Arc<dyn ConfigLoader>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.leader_election.try_become_leader().await {
                Ok(is_leader) => {
                    self.registry
                        .coordinator_is_leader
                        .with_label_values(&[&self.instance_id])
                        .set(if is_leader { 1.0 } else { 0.0 });
                    if is_leader && !self.prewarmed.swap(true, Ordering::SeqCst) {
                        self.prewarm_on_election(loader.as_ref()).await;
                    }
                }
                Err(err) => warn!(instance_id = %self.instance_id, error = %err, "leader_election_failed"),
            }
            sleep(LEADER_LOOP_INTERVAL).await;
        }
        let _ = self.leader_election.release().await;
        info!(instance_id = %self.instance_id, "leader_loop_stopped");
    }

    async fn prewarm_on_election(&self, loader: &dyn ConfigLoader) {
        let agents = match self.hub.list_notified_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                warn!(error = %err, "prewarm_agent_listing_failed");
                return;
            }
        };
        let ids: Vec<String> = agents.into_iter().map(|a| a.id).collect();
        match self.config_cache.prewarm(&ids, loader).await {
            Ok(report) => info!(
                instance_id = %self.instance_id,
                filled = report.filled,
                skipped = report.skipped,
                failed = report.failed.len(),
                "config_cache_prewarmed_on_election"
            ),
            Err(err) => warn!(error = %err, "config_cache_prewarm_failed"),
        }
    }

    /// §4.8 step 3 "Poll loop (leader only)". Non-leader instances skip
    /// every iteration's body and just sleep — they never enqueue.
    pub async fn run_poll_loop(self: Arc<Self>) {
        let mut since_last_stale_sweep = self.stale_sweep_interval;
        while !self.shutdown.load(Ordering::SeqCst) {
            if !self.is_leader() {
                sleep(self.jittered_interval()).await;
                continue;
            }

            let poll_started = std::time::Instant::now();
            if let Err(err) = self.poll_notifications_once().await {
                warn!(error = %err, "hub_notification_poll_failed");
            }
            self.registry
                .poll_duration_seconds
                .observe(poll_started.elapsed().as_secs_f64());

            if since_last_stale_sweep >= self.stale_sweep_interval {
                if let Err(err) = self.sweep_stale_agents_once().await {
                    warn!(error = %err, "stale_agent_sweep_failed");
                }
                since_last_stale_sweep = Duration::ZERO;
            }

            let sleep_for = self.jittered_interval();
            since_last_stale_sweep += sleep_for;
            sleep(sleep_for).await;
        }
        info!(instance_id = %self.instance_id, "poll_loop_stopped");
    }

    /// Long-poll first; once that endpoint has ever 404'd, switch
    /// permanently to the short-poll "agents with notifications" endpoint
    /// (§4.8: "if that endpoint returns not-found, switch permanently").
    async fn poll_notifications_once(&self) -> anyhow::Result<()> {
        let agents = if self.short_poll_fallback.load(Ordering::SeqCst) {
            self.hub.list_notified_agents().await?
        } else {
            match self.hub.poll_notifications(HUB_POLL_BATCH_SIZE).await? {
                Some(agents) => agents,
                None => {
                    warn!(instance_id = %self.instance_id, "hub_long_poll_unavailable_switching_to_short_poll");
                    self.short_poll_fallback.store(true, Ordering::SeqCst);
                    self.hub.list_notified_agents().await?
                }
            }
        };

        for agent in agents {
            let item = WorkItem::new(
                agent.id.clone(),
                agent.name,
                TaskType::Inbox,
                Priority::High,
                agent.notification_count,
            );
            match self.work_queue.enqueue(item, false).await? {
                EnqueueOutcome::Enqueued => {}
                EnqueueOutcome::SkippedDuplicate | EnqueueOutcome::SkippedBackoff => {
                    info!(agent_id = %agent.id, "notification_enqueue_skipped");
                }
            }
        }
        Ok(())
    }

    async fn sweep_stale_agents_once(&self) -> anyhow::Result<()> {
        let agents = self.hub.list_stale_agents(self.stale_sweep_interval).await?;
        for agent in agents {
            let item = WorkItem::new(agent.id.clone(), agent.name, TaskType::Discovery, Priority::Normal, 0);
            self.work_queue.enqueue(item, false).await?;
        }
        Ok(())
    }

    fn jittered_interval(&self) -> Duration {
        let base = self.poll_interval.as_secs_f64();
        let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
        Duration::from_secs_f64((base * (1.0 + jitter)).max(0.1))
    }

    /// §4.8 "Health-check loop": every 30s snapshot runner heartbeats and
    /// lock owners. A lock held by a runner with no live heartbeat is
    /// reported as stale but left in place — see the "stale-lock handling"
    /// decision in the repo's design notes: this loop only warns, it never
    /// force-deletes a lock, since TTL expiry already bounds how long a
    /// truly dead holder can block re-claiming.
    pub async fn run_health_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.health_snapshot_once().await {
                warn!(error = %err, "health_snapshot_failed");
            }
            sleep(HEALTH_LOOP_INTERVAL).await;
        }
        info!(instance_id = %self.instance_id, "health_loop_stopped");
    }

    async fn health_snapshot_once(&self) -> anyhow::Result<()> {
        let runners = self.assigner.get_active_runners().await?;
        let locked = self.assigner.get_locked_agents().await?;
        let live_runner_ids: std::collections::HashSet<&str> =
            runners.iter().map(|r| r.runner_id.as_str()).collect();

        let mut to_clean = Vec::new();
        {
            let mut strikes = self.stale_lock_strikes.lock().unwrap();
            strikes.retain(|agent_id, _| locked.iter().any(|(a, _)| a == agent_id));

            for (agent_id, runner_id) in &locked {
                if live_runner_ids.contains(runner_id.as_str()) {
                    strikes.remove(agent_id);
                    continue;
                }
                let count = strikes.entry(agent_id.clone()).or_insert(0);
                *count += 1;
                warn!(
                    agent_id = %agent_id,
                    runner_id = %runner_id,
                    strikes = *count,
                    "lock_held_by_runner_with_no_live_heartbeat"
                );
                if self.stale_lock_cleanup_enabled && *count >= self.stale_lock_cleanup_threshold {
                    to_clean.push(agent_id.clone());
                }
            }
            for agent_id in &to_clean {
                strikes.remove(agent_id);
            }
        }

        for agent_id in to_clean {
            match self.store.delete(&fleet_store::lock_key(&agent_id)).await {
                Ok(_) => warn!(agent_id = %agent_id, "stale_lock_force_deleted"),
                Err(err) => warn!(agent_id = %agent_id, error = %err, "stale_lock_cleanup_failed"),
            }
        }

        info!(
            instance_id = %self.instance_id,
            live_runners = runners.len(),
            locked_agents = locked.len(),
            "health_snapshot"
        );
        Ok(())
    }

    /// §4.8 "Stats loop": every 60s emit queue depths, in-flight counts,
    /// and leader status. The `queue_depth`/`queue_active_tasks` gauges
    /// themselves are kept fresh by `fleet_telemetry::run_queue_depth_collector`
    /// (§4.11's 15s collector); this loop is the human-readable summary on
    /// top, at a coarser 60s cadence.
    pub async fn run_stats_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.stats_snapshot_once().await {
                warn!(error = %err, "stats_snapshot_failed");
            }
            sleep(STATS_LOOP_INTERVAL).await;
        }
        info!(instance_id = %self.instance_id, "stats_loop_stopped");
    }

    async fn stats_snapshot_once(&self) -> anyhow::Result<()> {
        let lane_depths = self.work_queue.lane_depths().await?;
        let active = self.work_queue.active_count().await?;
        let backoff = self.work_queue.backoff_count().await?;
        info!(
            instance_id = %self.instance_id,
            is_leader = self.is_leader(),
            ?lane_depths,
            active,
            backoff,
            "queue_stats_snapshot"
        );
        Ok(())
    }

    /// §4.8 step 5: release leadership on shutdown. The store connection
    /// itself has no explicit close — `StoreBackend` implementations drop
    /// their connections when the `Arc` is released at process exit.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(err) = self.leader_election.release().await {
            warn!(instance_id = %self.instance_id, error = %err, "leadership_release_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_cache::CacheError;
    use fleet_hub::{BudgetHealth, ConsumptionReport, HubError, NotificationAgent, StaleAgent};
    use fleet_queue::WorkQueueSettings;
    use fleet_store::InMemoryBackend;
    use fleet_types::AgentConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHub {
        notified: Vec<NotificationAgent>,
        stale: Vec<StaleAgent>,
        long_poll_404: bool,
        short_poll_calls: Mutex<u32>,
    }

    #[async_trait]
    impl Hub for FakeHub {
        async fn poll_notifications(&self, _batch_size: u32) -> Result<Option<Vec<NotificationAgent>>, HubError> {
            if self.long_poll_404 {
                Ok(None)
            } else {
                Ok(Some(self.notified.clone()))
            }
        }
        async fn list_notified_agents(&self) -> Result<Vec<NotificationAgent>, HubError> {
            *self.short_poll_calls.lock().unwrap() += 1;
            Ok(self.notified.clone())
        }
        async fn list_stale_agents(&self, _min_staleness: Duration) -> Result<Vec<StaleAgent>, HubError> {
            Ok(self.stale.clone())
        }
        async fn mark_activated(&self, _agent_id: &str) -> Result<(), HubError> {
            Ok(())
        }
        async fn budget_health(&self, _agent_id: &str) -> Result<BudgetHealth, HubError> {
            unimplemented!()
        }
        async fn report_consumption(&self, _report: ConsumptionReport<'_>) -> Result<(), HubError> {
            Ok(())
        }
    }

    struct FakeLoader;

    #[async_trait]
    impl ConfigLoader for FakeLoader {
        async fn load(&self, _agent_id: &str) -> Result<AgentConfig, CacheError> {
            Ok(serde_json::from_value(serde_json::json!({
                "cache_ttl": 60,
                "agent_type": "autonomous",
            }))
            .unwrap())
        }
    }

    fn coordinator(hub: Arc<FakeHub>) -> Arc<Coordinator> {
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let work_queue = Arc::new(WorkQueue::new(store.clone(), WorkQueueSettings::default()));
        let config_cache = Arc::new(ConfigCache::new(store.clone()));
        Arc::new(Coordinator::new(
            "c1",
            Duration::from_secs(30),
            Duration::from_secs(600),
            Duration::from_millis(10),
            Duration::from_secs(3600),
            store,
            hub,
            work_queue,
            config_cache,
            Arc::new(MetricsRegistry::new().unwrap()),
            Arc::new(AtomicBool::new(false)),
        ))
    }

    #[tokio::test]
    async fn leader_loop_one_shot_sets_leadership_and_prewarms() {
        let hub = Arc::new(FakeHub {
            notified: vec![NotificationAgent {
                id: "a1".into(),
                name: "Agent".into(),
                notification_count: 1,
            }],
            ..Default::default()
        });
        let coordinator = coordinator(hub);
        coordinator.leader_election.try_become_leader().await.unwrap();
        coordinator
            .registry
            .coordinator_is_leader
            .with_label_values(&["c1"])
            .set(1.0);
        coordinator.prewarm_on_election(&FakeLoader).await;
        assert!(coordinator.config_cache.get("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn poll_once_enqueues_high_priority_notification_items() {
        let hub = Arc::new(FakeHub {
            notified: vec![NotificationAgent {
                id: "a1".into(),
                name: "Agent".into(),
                notification_count: 2,
            }],
            ..Default::default()
        });
        let coordinator = coordinator(hub);
        coordinator.poll_notifications_once().await.unwrap();
        let depths = coordinator.work_queue.lane_depths().await.unwrap();
        let high_depth = depths
            .iter()
            .find(|(p, _)| *p == Priority::High)
            .map(|(_, d)| *d)
            .unwrap();
        assert_eq!(high_depth, 1);
    }

    #[tokio::test]
    async fn long_poll_404_switches_permanently_to_short_poll() {
        let hub = Arc::new(FakeHub {
            long_poll_404: true,
            notified: vec![NotificationAgent {
                id: "a1".into(),
                name: "Agent".into(),
                notification_count: 1,
            }],
            ..Default::default()
        });
        let coordinator = coordinator(hub.clone());

        coordinator.poll_notifications_once().await.unwrap();
        assert!(coordinator.short_poll_fallback.load(Ordering::SeqCst));
        assert_eq!(*hub.short_poll_calls.lock().unwrap(), 1);

        coordinator.poll_notifications_once().await.unwrap();
        assert_eq!(*hub.short_poll_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_sweep_enqueues_normal_priority_discovery_items() {
        let hub = Arc::new(FakeHub {
            stale: vec![StaleAgent {
                id: "a2".into(),
                name: "Agent Two".into(),
                last_activated_at: None,
            }],
            ..Default::default()
        });
        let coordinator = coordinator(hub);
        coordinator.sweep_stale_agents_once().await.unwrap();
        let depths = coordinator.work_queue.lane_depths().await.unwrap();
        let normal_depth = depths
            .iter()
            .find(|(p, _)| *p == Priority::Normal)
            .map(|(_, d)| *d)
            .unwrap();
        assert_eq!(normal_depth, 1);
    }

    #[tokio::test]
    async fn health_snapshot_warns_on_lock_without_live_heartbeat_but_does_not_delete_it() {
        let hub = Arc::new(FakeHub::default());
        let coordinator = coordinator(hub);
        let item = WorkItem::new("a1", "Agent", TaskType::Inbox, Priority::High, 1);
        coordinator.assigner.try_claim(item, "ghost-runner").await.unwrap();

        coordinator.health_snapshot_once().await.unwrap();

        let locked = coordinator.assigner.get_locked_agents().await.unwrap();
        assert_eq!(locked, vec![("a1".to_string(), "ghost-runner".to_string())]);
    }

    #[tokio::test]
    async fn run_poll_loop_stops_promptly_once_shutdown_is_set() {
        let coordinator = coordinator(Arc::new(FakeHub::default()));
        coordinator.shutdown.store(true, Ordering::SeqCst);
        coordinator.clone().run_poll_loop().await;
    }

    #[tokio::test]
    async fn stale_lock_cleanup_deletes_only_after_threshold_consecutive_strikes_when_enabled() {
        let hub = Arc::new(FakeHub::default());
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let work_queue = Arc::new(WorkQueue::new(store.clone(), WorkQueueSettings::default()));
        let config_cache = Arc::new(ConfigCache::new(store.clone()));
        let coordinator = Coordinator::new(
            "c1",
            Duration::from_secs(30),
            Duration::from_secs(600),
            Duration::from_millis(10),
            Duration::from_secs(3600),
            store,
            hub,
            work_queue,
            config_cache,
            Arc::new(MetricsRegistry::new().unwrap()),
            Arc::new(AtomicBool::new(false)),
        )
        .with_stale_lock_cleanup(true, 2);

        let item = WorkItem::new("a1", "Agent", TaskType::Inbox, Priority::High, 1);
        coordinator.assigner.try_claim(item, "ghost-runner").await.unwrap();

        coordinator.health_snapshot_once().await.unwrap();
        let locked = coordinator.assigner.get_locked_agents().await.unwrap();
        assert_eq!(locked.len(), 1, "lock must survive the first strike");

        coordinator.health_snapshot_once().await.unwrap();
        let locked = coordinator.assigner.get_locked_agents().await.unwrap();
        assert!(locked.is_empty(), "lock must be force-deleted on the second strike");
    }
}
