//! Ties an assignment to a runner via the distributed lock; tracks
//! assignment metadata, runner heartbeats, and the recent-result ring
//! (§4.7).

mod error;
mod keys;
mod model;

pub use error::AssignerError;
pub use model::{ActivationRecord, RunnerHeartbeat, RunnerStatus};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_hub::Hub;
use fleet_store::{lock_key, DistributedLock, StoreBackend};
use fleet_types::{ActivationResult, Assignment, WorkItem};
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct AssignerSettings {
    pub lock_ttl: Duration,
    pub activation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for AssignerSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(600),
            activation_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(15),
        }
    }
}

pub struct Assigner {
    store: Arc<dyn StoreBackend>,
    lock: DistributedLock,
    hub: Arc<dyn Hub>,
    settings: AssignerSettings,
}

impl Assigner {
    pub fn new(store: Arc<dyn StoreBackend>, hub: Arc<dyn Hub>, settings: AssignerSettings) -> Self {
        let lock = DistributedLock::new(store.clone());
        Self {
            store,
            lock,
            hub,
            settings,
        }
    }

    /// Attempts to bind `item` to `runner_id` via lock acquire. On success,
    /// records an activation key the runner's state machine can be
    /// recovered from if the process dies mid-activation.
    pub async fn try_claim(
        &self,
        item: WorkItem,
        runner_id: &str,
    ) -> Result<Option<Assignment>, AssignerError> {
        let key = lock_key(&item.agent_id);
        if !self.lock.acquire(&key, runner_id, self.settings.lock_ttl).await? {
            return Ok(None);
        }

        let record = ActivationRecord {
            runner_id: runner_id.to_string(),
            started_at: Utc::now(),
            task_type: item.task_type,
        };
        let raw = serde_json::to_string(&record)?;
        self.store
            .set(
                &keys::activation_key(&item.agent_id),
                &raw,
                Some(self.settings.activation_timeout),
                false,
            )
            .await?;

        Ok(Some(Assignment::from_claim(item, runner_id)))
    }

    /// Atomic ownership check + lock release (the compare is done
    /// server-side, so there is no window for a stolen lock between
    /// checking ownership and deleting). Returns `false` without acting if
    /// `runner_id` is not the current owner.
    pub async fn release(
        &self,
        agent_id: &str,
        runner_id: &str,
        result: Option<ActivationResult>,
    ) -> Result<bool, AssignerError> {
        let key = lock_key(agent_id);
        if !self.lock.release(&key, runner_id).await? {
            return Ok(false);
        }

        if let Some(result) = result {
            let raw = serde_json::to_string(&result)?;
            self.store.lpush(keys::RESULTS_RING, &raw).await?;
            self.store.ltrim(keys::RESULTS_RING, keys::RESULTS_RING_CAP).await?;
        }

        self.store.delete(&keys::activation_key(agent_id)).await?;

        let hub = self.hub.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = hub.mark_activated(&agent_id).await {
                warn!(agent_id = %agent_id, error = %err, "hub_mark_activated_failed");
            }
        });

        Ok(true)
    }

    pub async fn extend_lock(
        &self,
        agent_id: &str,
        runner_id: &str,
        additional_ttl: Option<Duration>,
    ) -> Result<bool, AssignerError> {
        let ttl = additional_ttl.unwrap_or(self.settings.lock_ttl);
        Ok(self.lock.extend(&lock_key(agent_id), runner_id, ttl).await?)
    }

    pub async fn heartbeat(
        &self,
        runner_id: &str,
        status: RunnerStatus,
    ) -> Result<(), AssignerError> {
        let heartbeat = RunnerHeartbeat {
            runner_id: runner_id.to_string(),
            status,
            timestamp: Utc::now(),
        };
        let raw = serde_json::to_string(&heartbeat)?;
        let ttl = self.settings.poll_interval.saturating_mul(2);
        self.store
            .set(&keys::heartbeat_key(runner_id), &raw, Some(ttl), false)
            .await?;
        Ok(())
    }

    pub async fn get_active_runners(&self) -> Result<Vec<RunnerHeartbeat>, AssignerError> {
        let heartbeat_keys = self.store.scan(&format!("{}*", keys::HEARTBEAT_PREFIX)).await?;
        let mut runners = Vec::with_capacity(heartbeat_keys.len());
        for key in heartbeat_keys {
            if let Some(raw) = self.store.get(&key).await? {
                match serde_json::from_str(&raw) {
                    Ok(hb) => runners.push(hb),
                    Err(err) => error!(key = %key, error = %err, "heartbeat_record_corrupt"),
                }
            }
        }
        Ok(runners)
    }

    pub async fn get_locked_agents(&self) -> Result<Vec<(String, String)>, AssignerError> {
        let lock_keys = self.store.scan(&format!("{}*", keys::LOCK_PREFIX)).await?;
        let mut locked = Vec::with_capacity(lock_keys.len());
        for key in lock_keys {
            let Some(runner_id) = self.store.get(&key).await? else {
                continue;
            };
            let agent_id = key.trim_start_matches(keys::LOCK_PREFIX).to_string();
            locked.push((agent_id, runner_id));
        }
        Ok(locked)
    }

    pub async fn get_recent_results(&self, limit: usize) -> Result<Vec<ActivationResult>, AssignerError> {
        let raw_entries = self
            .store
            .lrange(keys::RESULTS_RING, limit.min(keys::RESULTS_RING_CAP))
            .await?;
        let mut results = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            results.push(serde_json::from_str(&raw)?);
        }
        Ok(results)
    }
}
