use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::store::ClaimedJob;
use crate::worker::environment::{EnvHandle, SCRIPT_FILE};

/// Result of one script execution. Every variant except `Abandoned` is
/// recorded to the store by the caller.
#[derive(Debug)]
pub enum RunOutcome {
    /// Exit code 0; payload is captured stdout.
    Completed(Vec<u8>),
    /// Non-zero exit, spawn failure, or wait failure; payload is a diagnostic.
    Failed(Vec<u8>),
    /// The job's own timeout elapsed and the process was killed.
    DeadlineExceeded(Vec<u8>),
    /// Shutdown was requested mid-run; nothing is recorded and the
    /// watchdog reclaims the job later.
    Abandoned,
}

/// Runs `sh run.sh` inside the job's environment directory with a hard
/// wall-clock deadline and capped output capture.
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        job: &ClaimedJob,
        env: &EnvHandle,
        token: &CancellationToken,
    ) -> RunOutcome {
        let mut child = match Command::new("sh")
            .arg(SCRIPT_FILE)
            .current_dir(&env.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to spawn job process");
                return RunOutcome::Failed(
                    format!("failed to spawn job process: {e}").into_bytes(),
                );
            }
        };

        let cap = self.config.result_cap_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        // Drain the pipes concurrently with the wait so a chatty child
        // never blocks on a full pipe.
        let stdout_task = tokio::spawn(read_capped(stdout, cap));
        let stderr_task = tokio::spawn(read_capped(stderr, cap));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                tracing::info!(job_id = %job.id, "shutdown during execution, abandoning job");
                let _ = child.start_kill();
                return RunOutcome::Abandoned;
            }
            _ = tokio::time::sleep(job.timeout) => {
                tracing::warn!(job_id = %job.id, timeout = ?job.timeout, "job exceeded its deadline, killing process");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return RunOutcome::DeadlineExceeded(
                    format!("job exceeded its timeout of {:?}", job.timeout).into_bytes(),
                );
            }
        };

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        match status {
            Err(e) => RunOutcome::Failed(
                format!("failed to wait for job process: {e}").into_bytes(),
            ),
            Ok(status) if status.success() => RunOutcome::Completed(stdout_bytes),
            Ok(status) => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "terminated by signal".to_string());
                let mut diagnostic = format!("process exited with code {code}").into_bytes();
                if !stderr_bytes.is_empty() {
                    diagnostic.push(b'\n');
                    diagnostic.extend_from_slice(&stderr_bytes);
                }
                diagnostic.truncate(cap);
                RunOutcome::Failed(diagnostic)
            }
        }
    }
}

/// Reads a child pipe to EOF, keeping at most `cap` bytes. Bytes past the
/// cap are discarded but the pipe keeps draining.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin + Send,
{
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if captured.len() < cap {
                    let take = n.min(cap - captured.len());
                    captured.extend_from_slice(&chunk[..take]);
                }
            }
            Err(_) => break,
        }
    }
    captured
}
