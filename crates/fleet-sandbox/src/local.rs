//! Filesystem-isolated sandbox (grounded on the original `LocalSandbox`:
//! "direct execution (MVP, for development)" — a per-activation tempdir,
//! no container boundary). A `DockerSandbox`-equivalent is not provided:
//! provisioning an actual container runtime is an operational concern of
//! the deployment, not the work-distribution core, and the `Sandbox` trait
//! is the seam a production build would plug one in at.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::{ActivationRequest, Sandbox, SandboxFactory};

/// Creates one tempdir workspace per activation and removes it on stop.
pub struct LocalSandbox {
    workspace: PathBuf,
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn start(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.workspace).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Err(err) = tokio::fs::remove_dir_all(&self.workspace).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(workspace = %self.workspace.display(), error = %err, "local_sandbox_cleanup_failed");
            }
        }
        Ok(())
    }
}

pub struct LocalSandboxFactory {
    root: PathBuf,
}

impl LocalSandboxFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SandboxFactory for LocalSandboxFactory {
    async fn create(&self, request: &ActivationRequest) -> anyhow::Result<Box<dyn Sandbox>> {
        let workspace = self
            .root
            .join(format!("agent-{}-{}", request.agent_id, Uuid::new_v4()));
        Ok(Box::new(LocalSandbox { workspace }))
    }
}
