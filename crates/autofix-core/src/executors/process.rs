// src/executors/process.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{CodeExecutor, ExecutionResult};
use crate::config::ExecutionSettings;

/// Upper bound on captured bytes per stream; the rest is read and dropped so
/// the child never blocks on a full pipe.
const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

/// How long to wait for the pipe readers once the child is gone.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Bytes captured from one stream. Shared with the reader task so a reader
/// that has to be aborted still leaves behind what it read.
type Captured = Arc<Mutex<Vec<u8>>>;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs each submission with a local interpreter inside its own scratch
/// directory.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    interpreter: String,
    script_extension: String,
    work_dir: Option<PathBuf>,
    safe_mode: bool,
}

/// Every process the submission starts shares the child's process group.
/// Killing the group reaches background processes that would otherwise
/// outlive the run and hold the output pipes open. Dropping the guard kills
/// the group, which also covers cancellation.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        kill_process_group(pgid);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// The on-disk artifact of one execution. Dropping it removes the directory,
/// so every exit path of `execute` (including cancellation) cleans up.
struct Scratch {
    dir: TempDir,
    script: PathBuf,
}

impl ProcessExecutor {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script_extension: "py".to_string(),
            work_dir: None,
            safe_mode: true,
        }
    }

    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        let mut executor = Self::new(settings.interpreter.clone()).with_safe_mode(settings.safe_mode);
        if let Some(dir) = &settings.work_dir {
            executor = executor.with_work_dir(dir.clone());
        }
        executor
    }

    /// Parent directory for scratch directories. Defaults to the system
    /// temp dir.
    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = Some(dir);
        self
    }

    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_script_extension(mut self, extension: impl Into<String>) -> Self {
        self.script_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    async fn prepare_scratch(&self, source: &str) -> std::io::Result<Scratch> {
        let dir = match &self.work_dir {
            Some(base) => Builder::new().prefix("autofix-").tempdir_in(base)?,
            None => Builder::new().prefix("autofix-").tempdir()?,
        };

        let script = dir.path().join(format!(
            "script_{}.{}",
            Uuid::new_v4().simple(),
            self.script_extension
        ));

        let mut file = fs::File::create(&script).await?;
        file.write_all(source.as_bytes()).await?;
        file.flush().await?;

        Ok(Scratch { dir, script })
    }

    fn build_command(&self, script: &Path, scratch_dir: &Path) -> Command {
        let mut std_command = std::process::Command::new(&self.interpreter);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        let mut command = Command::from(std_command);
        command
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.safe_mode {
            let path_env = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
            command
                .env_clear()
                .env("PATH", path_env)
                .current_dir(scratch_dir);
        }

        command
    }

    async fn run_script(&self, scratch: &Scratch, timeout: Duration, start: Instant) -> ExecutionResult {
        let mut child = match self.build_command(&scratch.script, scratch.dir.path()).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to start interpreter '{}': {}", self.interpreter, e);
                return ExecutionResult::not_started(
                    format!("Failed to start interpreter '{}': {}", self.interpreter, e),
                    start.elapsed(),
                );
            }
        };

        let group = ProcessGroup { pgid: child.id() };

        let stdout_buf = Captured::default();
        let stderr_buf = Captured::default();
        let stdout_reader = tokio::spawn(read_capped(child.stdout.take(), stdout_buf.clone()));
        let stderr_reader = tokio::spawn(read_capped(child.stderr.take(), stderr_buf.clone()));

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        // Leftover background processes die with the run, which also closes
        // any pipe they inherited.
        group.kill();
        let (status, timed_out, wait_error) = match waited {
            Ok(Ok(status)) => (Some(status), false, None),
            Ok(Err(e)) => {
                log::error!("Failed while waiting for child process: {}", e);
                if let Err(kill_err) = child.kill().await {
                    log::warn!("Failed to kill child after wait error: {}", kill_err);
                }
                (None, false, Some(format!("Failed while waiting for process: {}", e)))
            }
            Err(_) => {
                log::warn!("Execution timed out after {:?}, killing child", timeout);
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed out child: {}", e);
                }
                (None, true, None)
            }
        };

        let stdout = collect_output(stdout_reader, &stdout_buf).await;
        let stderr = collect_output(stderr_reader, &stderr_buf).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if timed_out {
            return ExecutionResult {
                stdout,
                stderr,
                timed_out: true,
                exit_error: None,
                exit_code: None,
                duration_ms,
                started: true,
            };
        }

        let exit_code = status.and_then(|s| s.code());
        let exit_error = match (status, wait_error) {
            (_, Some(error)) => Some(error),
            (Some(status), None) if status.success() => None,
            (Some(status), None) => {
                let trimmed = stderr.trim();
                if trimmed.is_empty() {
                    Some(format!("Process exited with {}", status))
                } else {
                    Some(trimmed.to_string())
                }
            }
            (None, None) => Some("Process ended without an exit status".to_string()),
        };

        ExecutionResult {
            stdout,
            stderr,
            timed_out: false,
            exit_error,
            exit_code,
            duration_ms,
            started: true,
        }
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    async fn execute(&self, source: &str, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();

        let scratch = match self.prepare_scratch(source).await {
            Ok(scratch) => scratch,
            Err(e) => {
                log::error!("Failed to materialize submission: {}", e);
                return ExecutionResult::not_started(
                    format!("Failed to prepare script: {}", e),
                    start.elapsed(),
                );
            }
        };
        log::debug!("Executing {} with {}", scratch.script.display(), self.interpreter);

        let result = self.run_script(&scratch, timeout, start).await;

        let scratch_path = scratch.dir.path().to_path_buf();
        if let Err(e) = scratch.dir.close() {
            log::warn!(
                "Failed to remove scratch directory {}: {}",
                scratch_path.display(),
                e
            );
        }

        log::info!(
            "Execution finished in {} ms (timed_out={}, failed={})",
            result.duration_ms,
            result.timed_out,
            result.is_failure()
        );
        result
    }
}

async fn read_capped<R: AsyncRead + Unpin>(stream: Option<R>, captured: Captured) {
    let Some(mut stream) = stream else {
        return;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut buffer = match captured.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let room = MAX_CAPTURED_BYTES.saturating_sub(buffer.len());
                buffer.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                log::debug!("Stopped reading child output: {}", e);
                break;
            }
        }
    }
}

/// Waits for the reader to drain its pipe, then returns whatever it captured.
/// A reader still blocked after the grace period is aborted; its bytes so far
/// are kept.
async fn collect_output(reader: JoinHandle<()>, captured: &Captured) -> String {
    let abort = reader.abort_handle();
    match tokio::time::timeout(OUTPUT_GRACE, reader).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Output reader task failed: {}", e),
        Err(_) => {
            abort.abort();
            log::warn!("Output reader did not finish within {:?}", OUTPUT_GRACE);
        }
    }

    let buffer = match captured.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    String::from_utf8_lossy(&buffer).into_owned()
}
