use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Hub(#[from] fleet_hub::HubError),

    #[error(transparent)]
    Store(#[from] fleet_store::StoreError),
}
