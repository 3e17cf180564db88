use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_store::StoreBackend;
use fleet_types::{Priority, WorkItem};
use tracing::warn;

use crate::error::QueueError;
use crate::keys::{self, ACTIVE, BACKOFF, FAILURES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    SkippedDuplicate,
    SkippedBackoff,
}

#[derive(Debug, Clone)]
pub struct WorkQueueSettings {
    pub max_failures: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for WorkQueueSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(3600),
        }
    }
}

pub struct WorkQueue {
    store: Arc<dyn StoreBackend>,
    settings: WorkQueueSettings,
}

impl WorkQueue {
    pub fn new(store: Arc<dyn StoreBackend>, settings: WorkQueueSettings) -> Self {
        Self { store, settings }
    }

    /// §4.4 `enqueue`. Dedup and backoff are both bypassed when `force`.
    pub async fn enqueue(&self, item: WorkItem, force: bool) -> Result<EnqueueOutcome, QueueError> {
        if !force {
            if self.store.hget(ACTIVE, &item.agent_id).await?.is_some() {
                return Ok(EnqueueOutcome::SkippedDuplicate);
            }
            if let Some(deadline_raw) = self.store.hget(BACKOFF, &item.agent_id).await? {
                let deadline: i64 = deadline_raw.parse().unwrap_or(0);
                if deadline > Utc::now().timestamp() {
                    return Ok(EnqueueOutcome::SkippedBackoff);
                }
                // Expired deadline observed — lazily remove it (invariant 2).
                self.store.hdel(BACKOFF, &item.agent_id).await?;
            }
        }

        let serialized = item.to_json()?;
        self.store.lpush(&keys::lane_key(item.priority), &serialized).await?;
        Ok(EnqueueOutcome::Enqueued)
    }

    /// §4.4 `claim`. Pops the tail of the first non-empty lane in strict
    /// priority order, then marks the agent active.
    pub async fn claim(
        &self,
        runner_id: &str,
        timeout: Duration,
    ) -> Result<Option<WorkItem>, QueueError> {
        let lanes: Vec<String> = Priority::all_in_order()
            .iter()
            .map(|p| keys::lane_key(*p))
            .collect();
        let lane_refs: Vec<&str> = lanes.iter().map(String::as_str).collect();

        let Some((_, raw)) = self.store.brpop(&lane_refs, timeout).await? else {
            return Ok(None);
        };

        let item = WorkItem::from_json(&raw)?;
        self.store.hset(ACTIVE, &item.agent_id, runner_id).await?;
        Ok(Some(item))
    }

    /// §4.4 `complete`. On success, clears the circuit breaker state for
    /// this agent; on failure, advances the failure counter and installs
    /// a backoff deadline once `max_failures` is reached (invariant 7).
    pub async fn complete(&self, item: &WorkItem, success: bool) -> Result<(), QueueError> {
        self.store.hdel(ACTIVE, &item.agent_id).await?;

        if success {
            self.store.hdel(FAILURES, &item.agent_id).await?;
            self.store.hdel(BACKOFF, &item.agent_id).await?;
            return Ok(());
        }

        let failures = self.store.hincrby(FAILURES, &item.agent_id, 1).await?;
        if failures as u32 >= self.settings.max_failures {
            let backoff_secs = self.backoff_seconds(failures as u32);
            let deadline = Utc::now().timestamp() + backoff_secs as i64;
            self.store
                .hset(BACKOFF, &item.agent_id, &deadline.to_string())
                .await?;
            warn!(agent_id = %item.agent_id, failures, backoff_secs, "agent_circuit_tripped");
        }
        Ok(())
    }

    /// Clears `work:active` without touching the failure counter or
    /// backoff table. Used by the runner's S1 lock-race path (§4.9): a
    /// lost lock-acquire race is not the agent's fault and must not burn a
    /// circuit-breaker strike, but the agent must stop looking claimed.
    pub async fn release_active_only(&self, agent_id: &str) -> Result<(), QueueError> {
        self.store.hdel(ACTIVE, agent_id).await?;
        Ok(())
    }

    /// §4.4 `clear_backoff` — operator override.
    pub async fn clear_backoff(&self, agent_id: &str) -> Result<(), QueueError> {
        self.store.hdel(BACKOFF, agent_id).await?;
        self.store.hdel(FAILURES, agent_id).await?;
        Ok(())
    }

    /// Snapshot of lane depths, highest priority first — used by the
    /// telemetry collector's `queue_depth` gauge.
    pub async fn lane_depths(&self) -> Result<Vec<(Priority, u64)>, QueueError> {
        let mut depths = Vec::with_capacity(3);
        for priority in Priority::all_in_order() {
            let depth = self.store.llen(&keys::lane_key(priority)).await?;
            depths.push((priority, depth));
        }
        Ok(depths)
    }

    pub async fn active_count(&self) -> Result<u64, QueueError> {
        Ok(self.store.hlen(ACTIVE).await?)
    }

    pub async fn backoff_count(&self) -> Result<u64, QueueError> {
        Ok(self.store.hlen(BACKOFF).await?)
    }

    fn backoff_seconds(&self, failures: u32) -> u64 {
        let over = failures.saturating_sub(self.settings.max_failures);
        let scaled = self.settings.backoff_base.as_secs().saturating_mul(1u64 << over.min(20));
        scaled.min(self.settings.backoff_max.as_secs())
    }
}
