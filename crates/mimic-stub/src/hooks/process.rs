//! Shell-command hook runner.

use super::{Hook, HookError};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs `sh -c <command>`, writing the document to stdin and reading the
/// replacement from stdout. The child is killed if it outlives the timeout.
#[derive(Debug, Clone)]
pub struct ProcessHook {
    command: String,
    timeout: Duration,
}

impl ProcessHook {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Hook for ProcessHook {
    async fn invoke(&self, doc: Value) -> Result<Value, HookError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HookError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let input = doc.to_string().into_bytes();
        let stdin = child.stdin.take();
        let write_input = async move {
            if let Some(mut stdin) = stdin {
                // A command that ignores stdin may close it early
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Hook did not read its input: {}", e);
                }
            }
        };

        let run = async move {
            let (_, output) = tokio::join!(write_input, child.wait_with_output());
            output
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(HookError::Spawn {
                    command: self.command.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(HookError::Timeout {
                    command: self.command.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(HookError::NonZeroExit {
                command: self.command.clone(),
                code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        serde_json::from_str(stdout.trim()).map_err(|e| HookError::MalformedOutput {
            command: self.command.clone(),
            reason: e.to_string(),
            stdout,
        })
    }

    fn describe(&self) -> String {
        self.command.clone()
    }
}
