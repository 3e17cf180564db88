use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] fleet_store::StoreError),

    #[error("failed to (de)serialize agent config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config loader failed: {0}")]
    Loader(String),
}
