//! Narrow adapter over an external coding-tool subprocess (Claude Code,
//! Goose, Aider, ...). The core never embeds a specific tool's CLI wrapper
//! — those are LLM-provider/agentic-loop internals and explicitly out of
//! scope (spec.md §1(b)) — it only owns the boundary: serialize the
//! request, spawn the configured command, wait for a bounded execution,
//! parse the result. Grounded on the original executors' subprocess
//! invocation idiom (`executors/base.py`), generalized to one process
//! instead of one class per tool.

use std::process::Stdio;

use async_trait::async_trait;
use fleet_types::ActivationResult;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{ActivationExecutor, ActivationRequest};

/// Spawns `command` with `args`, writes the JSON-encoded
/// [`ActivationRequest`] to its stdin, and parses an [`ActivationResult`]
/// from its stdout. The child process is the opaque agentic-loop
/// collaborator; this type only owns getting bytes to and from it.
pub struct ProcessActivationExecutor {
    command: String,
    args: Vec<String>,
}

impl ProcessActivationExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl ActivationExecutor for ProcessActivationExecutor {
    async fn execute(&self, request: &ActivationRequest) -> anyhow::Result<ActivationResult> {
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("child process stdin unavailable"))?;
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("activation process exited with {}: {stderr}", output.status);
        }

        let result: ActivationResult = serde_json::from_slice(&output.stdout)?;
        Ok(result)
    }
}
