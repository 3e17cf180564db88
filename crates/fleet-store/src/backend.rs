use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::StoreError;

/// Uniform view of the external coordination store (§4.1). All operations
/// are non-blocking except [`StoreBackend::brpop`], which blocks up to the
/// caller-supplied timeout.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    // Key/value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> Result<bool, StoreError>;
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    // Hash
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError>;
    async fn hlen(&self, key: &str) -> Result<u64, StoreError>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    // List
    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError>;
    /// Atomically pop the tail of the first non-empty list among `keys`,
    /// in the order given, blocking up to `timeout`.
    async fn brpop(
        &self,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError>;
    async fn llen(&self, key: &str) -> Result<u64, StoreError>;
    /// Keep only the first `max_len` elements (head-relative), dropping
    /// the rest. Used to cap the recent-results ring.
    async fn ltrim(&self, key: &str, max_len: usize) -> Result<(), StoreError>;
    /// Read the first `count` elements head-relative, without popping.
    async fn lrange(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;

    // Prefix scan
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Server-side atomic script execution (used for compare-delete /
    /// compare-expire in the lock protocol). `keys` and `args` mirror
    /// Redis `EVAL`'s `KEYS`/`ARGV` convention.
    async fn eval_script(
        &self,
        script: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64, StoreError>;
}
