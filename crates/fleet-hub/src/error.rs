use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("hub returned unexpected status {0}")]
    Status(u16),

    #[error("failed to decode hub response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl HubError {
    /// Idempotent GETs are retried on these; 4xx other than a bare
    /// connection hiccup are treated as permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            HubError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            HubError::Status(code) => *code >= 500,
            HubError::Decode(_) => false,
        }
    }
}
