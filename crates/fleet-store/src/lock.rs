use std::sync::Arc;
use std::time::Duration;

use crate::backend::StoreBackend;
use crate::error::StoreError;

const COMPARE_DELETE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

const COMPARE_EXPIRE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('expire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Advisory, owner-identified lease (§4.2). Acquire is a single atomic
/// `SET NX EX`; release and extend go through server-side scripts so the
/// compare-then-act is never split across round trips.
pub struct DistributedLock {
    store: Arc<dyn StoreBackend>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self { store }
    }

    pub async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.store.set(key, owner, Some(ttl), true).await
    }

    pub async fn release(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let result = self
            .store
            .eval_script(COMPARE_DELETE_SCRIPT, &[key], &[owner])
            .await?;
        Ok(result == 1)
    }

    pub async fn extend(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let ttl_secs = ttl.as_secs().max(1).to_string();
        let result = self
            .store
            .eval_script(COMPARE_EXPIRE_SCRIPT, &[key], &[owner, &ttl_secs])
            .await?;
        Ok(result == 1)
    }

    /// Current holder, if any (best-effort read — not atomic with a
    /// subsequent acquire/release by design; locks are advisory).
    pub async fn current_owner(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.get(key).await
    }
}

pub fn lock_key(agent_id: &str) -> String {
    format!("agent_lock:{agent_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn lock() -> DistributedLock {
        DistributedLock::new(Arc::new(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn acquire_then_release_by_owner_succeeds() {
        let lock = lock();
        assert!(lock.acquire("k", "r1", Duration::from_secs(60)).await.unwrap());
        assert!(lock.release("k", "r1").await.unwrap());
        assert_eq!(lock.current_owner("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_owner_cannot_release_or_extend() {
        let lock = lock();
        lock.acquire("k", "r1", Duration::from_secs(60)).await.unwrap();
        assert!(!lock.release("k", "r2").await.unwrap());
        assert!(!lock.extend("k", "r2", Duration::from_secs(60)).await.unwrap());
        assert_eq!(lock.current_owner("k").await.unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn second_acquire_before_release_fails() {
        let lock = lock();
        assert!(lock.acquire("k", "r1", Duration::from_secs(60)).await.unwrap());
        assert!(!lock.acquire("k", "r2", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let lock = lock();
        lock.acquire("k", "r1", Duration::from_secs(60)).await.unwrap();
        assert!(lock.release("k", "r1").await.unwrap());
        assert!(!lock.release("k", "r1").await.unwrap());
    }
}
