use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::StoreError;
use crate::lock::DistributedLock;
use crate::StoreBackend;

const LEADER_KEY: &str = "coordinator:leader";

/// Single-holder leadership over [`LEADER_KEY`], a specialization of
/// [`DistributedLock`] (§4.3). `try_become_leader` is meant to be called
/// on a ~10s cadence by the coordinator's leader loop.
pub struct LeaderElection {
    lock: DistributedLock,
    instance_id: String,
    leader_ttl: Duration,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn StoreBackend>, instance_id: impl Into<String>, leader_ttl: Duration) -> Self {
        Self {
            lock: DistributedLock::new(store),
            instance_id: instance_id.into(),
            leader_ttl,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// One election cycle: attempt to acquire, and if that fails because
    /// we already hold it, refresh the TTL instead. Idempotent for the
    /// current leader.
    pub async fn try_become_leader(&self) -> Result<bool, StoreError> {
        if self.lock.acquire(LEADER_KEY, &self.instance_id, self.leader_ttl).await? {
            if !self.is_leader.swap(true, Ordering::SeqCst) {
                info!(instance_id = %self.instance_id, "became_leader");
            }
            return Ok(true);
        }

        match self.lock.current_owner(LEADER_KEY).await? {
            Some(owner) if owner == self.instance_id => {
                self.lock.extend(LEADER_KEY, &self.instance_id, self.leader_ttl).await?;
                self.is_leader.store(true, Ordering::SeqCst);
                Ok(true)
            }
            _ => {
                if self.is_leader.swap(false, Ordering::SeqCst) {
                    warn!(instance_id = %self.instance_id, "lost_leadership");
                }
                Ok(false)
            }
        }
    }

    pub async fn release(&self) -> Result<bool, StoreError> {
        let released = self.lock.release(LEADER_KEY, &self.instance_id).await?;
        self.is_leader.store(false, Ordering::SeqCst);
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    #[tokio::test]
    async fn first_instance_to_try_becomes_leader() {
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let c1 = LeaderElection::new(store.clone(), "c1", Duration::from_secs(30));
        let c2 = LeaderElection::new(store, "c2", Duration::from_secs(30));

        assert!(c1.try_become_leader().await.unwrap());
        assert!(!c2.try_become_leader().await.unwrap());
        assert!(c1.is_leader());
        assert!(!c2.is_leader());
    }

    #[tokio::test]
    async fn current_leader_refreshes_idempotently() {
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let c1 = LeaderElection::new(store, "c1", Duration::from_secs(30));
        assert!(c1.try_become_leader().await.unwrap());
        assert!(c1.try_become_leader().await.unwrap());
        assert!(c1.is_leader());
    }

    #[tokio::test]
    async fn release_then_other_instance_can_win() {
        let store: Arc<dyn StoreBackend> = Arc::new(InMemoryBackend::new());
        let c1 = LeaderElection::new(store.clone(), "c1", Duration::from_secs(30));
        let c2 = LeaderElection::new(store, "c2", Duration::from_secs(30));

        assert!(c1.try_become_leader().await.unwrap());
        assert!(c1.release().await.unwrap());
        assert!(c2.try_become_leader().await.unwrap());
    }
}
