use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::backend::StoreBackend;
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    pub url: String,
    /// Number of independent `ConnectionManager`s to round-robin across.
    /// Each manager multiplexes internally; this only bounds how many
    /// separate TCP connections the process holds open.
    pub pool_size: usize,
}

impl RedisBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 4,
        }
    }
}

/// Redis-backed [`StoreBackend`]. Connects lazily per-manager and lets
/// `ConnectionManager` reconnect on demand; no manual reconnect loop.
pub struct RedisBackend {
    managers: Vec<ConnectionManager>,
    next: AtomicUsize,
}

impl RedisBackend {
    pub async fn connect(config: RedisBackendConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
        let mut managers = Vec::with_capacity(config.pool_size.max(1));
        for _ in 0..config.pool_size.max(1) {
            let manager = client
                .get_connection_manager()
                .await
                .map_err(|e| StoreError::Fatal(e.to_string()))?;
            managers.push(manager);
        }
        Ok(Self {
            managers,
            next: AtomicUsize::new(0),
        })
    }

    fn conn(&self) -> ConnectionManager {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.managers.len();
        self.managers[i].clone()
    }
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if only_if_absent {
            cmd.arg("NX");
        }
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let result: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.conn().del(key).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.conn().exists(key).await?)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.conn().incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.conn().expire(key, ttl.as_secs() as i64).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn().hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.conn().hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError> {
        Ok(self.conn().hdel(key, field).await?)
    }

    async fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.conn().hlen(key).await?)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        Ok(self.conn().hincr(key, field, delta).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        Ok(self.conn().lpush(key, value).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        Ok(self.conn().rpush(key, value).await?)
    }

    async fn brpop(
        &self,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let mut cmd = redis::cmd("BRPOP");
        for key in keys {
            cmd.arg(*key);
        }
        cmd.arg(timeout.as_secs().max(1));
        let result: Option<(String, String)> = cmd.query_async(&mut self.conn()).await?;
        Ok(result)
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.conn().llen(key).await?)
    }

    async fn ltrim(&self, key: &str, max_len: usize) -> Result<(), StoreError> {
        let stop = max_len.saturating_sub(1) as isize;
        let _: () = self.conn().ltrim(key, 0, stop).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let stop = count.saturating_sub(1) as isize;
        Ok(self.conn().lrange(key, 0, stop).await?)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        use futures_util::StreamExt;
        while let Some(key) = iter.next().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn eval_script(
        &self,
        script: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64, StoreError> {
        let mut cmd = redis::Script::new(script).prepare_invoke();
        for key in keys {
            cmd.key(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        Ok(cmd.invoke_async(&mut self.conn()).await?)
    }
}
