use thiserror::Error;

/// Every store operation fails one of two ways: transiently (caller
/// retries/sleeps and moves on) or fatally (the process cannot make
/// progress — only raised at startup connectivity checks per §7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_timeout() || err.is_connection_refusal() {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Fatal(err.to_string())
        }
    }
}
