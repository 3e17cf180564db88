use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssignerError {
    #[error(transparent)]
    Store(#[from] fleet_store::StoreError),

    #[error("failed to (de)serialize assigner record: {0}")]
    Serialize(#[from] serde_json::Error),
}
