use std::path::PathBuf;

use async_trait::async_trait;
use fleet_types::AgentConfig;

use crate::error::CacheError;
use crate::ConfigLoader;

/// Default production `ConfigLoader`: one JSON file per agent under
/// `dir/{agent_id}.json`. Upstream config-file *formats* are out of scope
/// (spec.md §1(d)), but the runner/coordinator binaries still need some
/// default source to exercise the cache against — this is the simplest one
/// that satisfies "already-parsed config records" without inventing a
/// format of its own.
pub struct FileConfigLoader {
    dir: PathBuf,
}

impl FileConfigLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.json"))
    }
}

#[async_trait]
impl ConfigLoader for FileConfigLoader {
    async fn load(&self, agent_id: &str) -> Result<AgentConfig, CacheError> {
        let path = self.path_for(agent_id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CacheError::Loader(format!("{}: {e}", path.display())))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_config_from_matching_json_file() {
        let dir = tempdir();
        tokio::fs::write(
            dir.join("agent-1.json"),
            r#"{"cache_ttl":120,"agent_type":"autonomous"}"#,
        )
        .await
        .unwrap();

        let loader = FileConfigLoader::new(dir.clone());
        let config = loader.load("agent-1").await.unwrap();
        assert_eq!(config.cache_ttl, 120);

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn missing_file_is_a_loader_error() {
        let dir = tempdir();
        let loader = FileConfigLoader::new(dir.clone());
        let err = loader.load("ghost").await.unwrap_err();
        assert!(matches!(err, CacheError::Loader(_)));
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fleet-cache-test-{}-{}",
            std::process::id(),
            fastrand_like()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fastrand_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
