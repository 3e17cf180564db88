//! Per-agent config cache with per-entry TTL, point/mass invalidation, and
//! prewarm (§4.5).

mod error;
mod file_loader;

pub use error::CacheError;
pub use file_loader::FileConfigLoader;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_store::StoreBackend;
use fleet_types::AgentConfig;
use tracing::warn;

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const KEY_PREFIX: &str = "cache:agent:";

fn cache_key(agent_id: &str) -> String {
    format!("{KEY_PREFIX}{agent_id}")
}

/// Injected abstraction over wherever `AgentConfig`s actually come from
/// (the Hub, a file, ...). Kept opaque — loading upstream config formats
/// is out of scope here.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    async fn load(&self, agent_id: &str) -> Result<AgentConfig, CacheError>;
}

pub struct ConfigCache {
    store: Arc<dyn StoreBackend>,
    default_ttl: Duration,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_default_ttl(store: Arc<dyn StoreBackend>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<AgentConfig>, CacheError> {
        let Some(raw) = self.store.get(&cache_key(agent_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// TTL precedence: explicit `ttl` argument, else `config.cache_ttl`,
    /// else the cache's own default.
    pub async fn set(
        &self,
        agent_id: &str,
        config: &AgentConfig,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let effective_ttl = ttl.unwrap_or_else(|| {
            if config.cache_ttl == 0 {
                self.default_ttl
            } else {
                Duration::from_secs(config.cache_ttl)
            }
        });
        let raw = serde_json::to_string(config)?;
        self.store
            .set(&cache_key(agent_id), &raw, Some(effective_ttl), false)
            .await?;
        Ok(())
    }

    pub async fn invalidate(&self, agent_id: &str) -> Result<(), CacheError> {
        self.store.delete(&cache_key(agent_id)).await?;
        Ok(())
    }

    pub async fn invalidate_all(&self) -> Result<u64, CacheError> {
        let keys = self.store.scan(&format!("{KEY_PREFIX}*")).await?;
        let mut deleted = 0u64;
        for key in keys {
            deleted += self.store.delete(&key).await?;
        }
        Ok(deleted)
    }

    /// Fills every id in `agent_ids` not already cached. Per-id loader
    /// errors are recorded and do not abort the batch.
    pub async fn prewarm(
        &self,
        agent_ids: &[String],
        loader: &dyn ConfigLoader,
    ) -> Result<PrewarmReport, CacheError> {
        let mut report = PrewarmReport::default();
        let mut already_cached: HashSet<String> = HashSet::new();
        for id in agent_ids {
            if self.get(id).await?.is_some() {
                already_cached.insert(id.clone());
                report.skipped += 1;
                continue;
            }
            match loader.load(id).await {
                Ok(config) => {
                    self.set(id, &config, None).await?;
                    report.filled += 1;
                }
                Err(err) => {
                    warn!(agent_id = %id, error = %err, "config_prewarm_failed");
                    report.failed.push(id.clone());
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PrewarmReport {
    pub filled: u64,
    pub skipped: u64,
    pub failed: Vec<String>,
}
