//! Local model runner driven as a subprocess.
//!
//! Each turn runs `<tool> run <model> -` to completion, with the flat chat
//! transcript on stdin and the reply captured from stdout. The call is
//! bounded by a timeout; on expiry the child is killed.

use shared::error::ProcessError;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::backend::{LocalBackend, LocalStatus};

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 800;

pub struct OllamaRunner {
    tool: String,
    timeout: Duration,
}

impl OllamaRunner {
    pub fn new(tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }

    fn spawn_error(&self, e: io::Error) -> ProcessError {
        if e.kind() == io::ErrorKind::NotFound {
            ProcessError::NotFound {
                tool: self.tool.clone(),
            }
        } else {
            ProcessError::Spawn {
                tool: self.tool.clone(),
                source: e,
            }
        }
    }
}

async fn feed_stdin(mut stdin: ChildStdin, transcript: String) -> io::Result<()> {
    stdin.write_all(transcript.as_bytes()).await?;
    stdin.shutdown().await
}

#[async_trait::async_trait]
impl LocalBackend for OllamaRunner {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn status(&self, enabled: bool) -> LocalStatus {
        if !enabled {
            return LocalStatus::Disabled;
        }
        match which::which(&self.tool) {
            Ok(path) => {
                debug!("local runner resolved to {}", path.display());
                LocalStatus::Available
            }
            Err(_) => LocalStatus::Unavailable {
                reason: format!("`{}` not found on PATH", self.tool),
            },
        }
    }

    async fn run(&self, model: &str, transcript: &str) -> Result<String, ProcessError> {
        let start = Instant::now();
        let mut child = Command::new(&self.tool)
            .arg("run")
            .arg(model)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "runner stdin not captured"))?;

        // Write and read concurrently so a long transcript can't deadlock
        // against a full stdout pipe.
        let work = async {
            tokio::join!(
                feed_stdin(stdin, transcript.to_string()),
                child.wait_with_output()
            )
        };

        let (written, output) = match tokio::time::timeout(self.timeout, work).await {
            Ok(pair) => pair,
            Err(_) => {
                // Dropping the future drops the child, which kills it.
                warn!(tool = %self.tool, model, "local runner timed out after {:?}", self.timeout);
                return Err(ProcessError::TimedOut(self.timeout));
            }
        };

        let output = output?;
        if let Err(e) = written {
            // A runner may exit without draining stdin; its exit status decides.
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(ProcessError::Io(e));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            warn!(tool = %self.tool, model, code = ?output.status.code(), "local runner failed");
            return Err(ProcessError::NonZeroExit {
                code: output.status.code(),
                stderr: excerpt,
            });
        }

        info!(
            tool = %self.tool,
            model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "local runner finished"
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
