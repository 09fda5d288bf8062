//! Timeout-bounded code execution.
//!
//! Runs submitted source in a child process and reports what happened as an
//! [`ExecutionResult`]. This is not a sandbox: there is no namespace, cgroup
//! or seccomp isolation, only a wall-clock limit and a scratch directory that
//! lives exactly as long as one execution. Deployments that need real
//! isolation should put a container or jail around the interpreter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod process;

pub use process::ProcessExecutor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// False when the interpreter never ran.
    pub started: bool,
}

impl ExecutionResult {
    /// A result for a submission whose process never produced output, e.g.
    /// because the script could not be written or the interpreter failed to
    /// start.
    pub fn not_started(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            exit_error: Some(message.into()),
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
            started: false,
        }
    }

    /// Failure means a timeout, an exit error, or anything written to stderr.
    pub fn is_failure(&self) -> bool {
        self.timed_out || self.exit_error.is_some() || !self.stderr.trim().is_empty()
    }

    /// True when the child ran to completion, whatever its exit status.
    pub fn completed(&self) -> bool {
        self.started && !self.timed_out
    }

    /// The text handed to the diagnosis client when execution failed.
    pub fn failure_context(&self) -> Option<String> {
        if !self.is_failure() {
            return None;
        }

        let stderr = self.stderr.trim();
        if self.timed_out {
            let mut context = format!(
                "Execution timed out after {} ms and was terminated.",
                self.duration_ms
            );
            if !stderr.is_empty() {
                context.push_str("\nPartial stderr:\n");
                context.push_str(stderr);
            }
            return Some(context);
        }

        match &self.exit_error {
            Some(error) if !error.trim().is_empty() => Some(error.trim().to_string()),
            _ => Some(stderr.to_string()),
        }
    }
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Runs `source` once, waiting at most `timeout`. Never fails: every
    /// problem is reported inside the returned result.
    async fn execute(&self, source: &str, timeout: Duration) -> ExecutionResult;
}
