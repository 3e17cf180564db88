use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

use crate::backend::StoreBackend;
use crate::error::StoreError;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process fake store used by unit and integration tests so the test
/// suite never needs a live Redis. Not a production backend: no
/// persistence, no network, single process only.
#[derive(Default)]
pub struct InMemoryBackend {
    strings: Mutex<HashMap<String, Entry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(at) => at > Instant::now(),
            None => true,
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        if let Some(entry) = strings.get(key) {
            if Self::is_live(entry) {
                return Ok(Some(entry.value.clone()));
            }
            strings.remove(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> Result<bool, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        if only_if_absent {
            if let Some(existing) = strings.get(key) {
                if Self::is_live(existing) {
                    return Ok(false);
                }
            }
        }
        strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        Ok(strings.remove(key).map(|_| 1).unwrap_or(0))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        let current = strings
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.parse::<i64>().unwrap_or(0))
            .unwrap_or(0);
        let next = current + 1;
        strings.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        if let Some(entry) = strings.get_mut(key) {
            if Self::is_live(entry) {
                entry.expires_at = Some(Instant::now() + ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut hashes = self.hashes.lock().unwrap();
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let hashes = self.hashes.lock().unwrap();
        Ok(hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let hashes = self.hashes.lock().unwrap();
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError> {
        let mut hashes = self.hashes.lock().unwrap();
        if let Some(map) = hashes.get_mut(key) {
            return Ok(map.remove(field).map(|_| 1).unwrap_or(0));
        }
        Ok(0)
    }

    async fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        let hashes = self.hashes.lock().unwrap();
        Ok(hashes.get(key).map(|h| h.len() as u64).unwrap_or(0))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut hashes = self.hashes.lock().unwrap();
        let map = hashes.entry(key.to_string()).or_default();
        let current = map
            .get(field)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        map.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut lists = self.lists.lock().unwrap();
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        let len = list.len() as u64;
        drop(lists);
        self.notify.notify_waiters();
        Ok(len)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut lists = self.lists.lock().unwrap();
        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        let len = list.len() as u64;
        drop(lists);
        self.notify.notify_waiters();
        Ok(len)
    }

    async fn brpop(
        &self,
        keys: &[&str],
        wait: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut lists = self.lists.lock().unwrap();
                for key in keys {
                    if let Some(list) = lists.get_mut(*key) {
                        if let Some(value) = list.pop_back() {
                            return Ok(Some((key.to_string(), value)));
                        }
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let notified = self.notify.notified();
            if tokio_timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let lists = self.lists.lock().unwrap();
        Ok(lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn ltrim(&self, key: &str, max_len: usize) -> Result<(), StoreError> {
        let mut lists = self.lists.lock().unwrap();
        if let Some(list) = lists.get_mut(key) {
            list.truncate(max_len);
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let lists = self.lists.lock().unwrap();
        Ok(lists
            .get(key)
            .map(|l| l.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let prefix = pattern.trim_end_matches('*');
        let strings = self.strings.lock().unwrap();
        Ok(strings
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && Self::is_live(v))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Interprets only the two scripts `fleet-store` actually ships
    /// (compare-delete, compare-expire) by shape rather than executing Lua.
    async fn eval_script(
        &self,
        script: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64, StoreError> {
        let key = keys.first().copied().unwrap_or_default();
        let owner = args.first().copied().unwrap_or_default();
        let current = self.get(key).await?;
        if current.as_deref() != Some(owner) {
            return Ok(0);
        }
        if script.contains("del") {
            self.delete(key).await?;
            Ok(1)
        } else if script.contains("expire") {
            let ttl_secs: u64 = args.get(1).and_then(|v| v.parse().ok()).unwrap_or(0);
            self.expire(key, Duration::from_secs(ttl_secs)).await?;
            Ok(1)
        } else {
            Ok(0)
        }
    }
}
