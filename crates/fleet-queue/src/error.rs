use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] fleet_store::StoreError),

    #[error("failed to serialize work item: {0}")]
    Serialize(#[from] serde_json::Error),
}
