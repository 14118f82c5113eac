//! External text generation used by the summarizer.
//!
//! Generation is treated as unreliable: the summarizer must produce a result even
//! when the generator is missing, slow, failing, or silent.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Turns a prompt into condensed text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Runs the Claude CLI in stateless `--print` mode with the prompt on stdin.
pub struct ClaudeCliGenerator {
    claude_cmd: String,
    working_dir: Option<PathBuf>,
    timeout: std::time::Duration,
}

impl ClaudeCliGenerator {
    pub fn new(claude_cmd: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            claude_cmd: claude_cmd.into(),
            working_dir: None,
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn run(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.claude_cmd);
        cmd.arg("--print")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to execute '{}'. Is it in your PATH?",
                self.claude_cmd
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for Claude process")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Claude command failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl TextGenerator for ClaudeCliGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.run(prompt)).await {
            Ok(result) => result,
            Err(_) => bail!(
                "Claude command timed out after {}s",
                self.timeout.as_secs()
            ),
        }
    }
}
