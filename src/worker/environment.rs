use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::EnvironmentConfig;
use crate::error::{MillError, Result};
use crate::store::ClaimedJob;

/// Script file name inside every job directory.
pub const SCRIPT_FILE: &str = "run.sh";

/// Handle for one job's isolated workspace. Cheap to construct before
/// `prepare` runs, so teardown is possible even when preparation fails
/// partway through.
#[derive(Debug, Clone)]
pub struct EnvHandle {
    pub job_id: Uuid,
    pub dir: PathBuf,
}

/// Per-job execution workspace. `clear` must be invoked on every exit
/// path, including after a failed `prepare`.
#[async_trait]
pub trait JobEnvironment: Send + Sync {
    fn handle(&self, job_id: Uuid) -> EnvHandle;
    async fn prepare(&self, job: &ClaimedJob, handle: &EnvHandle) -> Result<()>;
    async fn clear(&self, handle: &EnvHandle) -> Result<()>;
}

/// Directory-per-job environment under a configured jobs root.
pub struct DirJobEnvironment {
    config: EnvironmentConfig,
}

impl DirJobEnvironment {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl JobEnvironment for DirJobEnvironment {
    fn handle(&self, job_id: Uuid) -> EnvHandle {
        EnvHandle {
            job_id,
            dir: self.config.jobs_dir.join(job_id.to_string()),
        }
    }

    async fn prepare(&self, job: &ClaimedJob, handle: &EnvHandle) -> Result<()> {
        if job.script.trim().is_empty() {
            return Err(MillError::JobFailure("job script is empty".to_string()));
        }

        // A stale directory from a crashed run must not leak into this one.
        if tokio::fs::try_exists(&handle.dir).await? {
            tokio::fs::remove_dir_all(&handle.dir).await?;
        }
        tokio::fs::create_dir_all(&handle.dir).await?;

        let script_path = handle.dir.join(SCRIPT_FILE);
        tokio::fs::write(&script_path, job.script.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
                .await?;
        }

        tracing::debug!(job_id = %handle.job_id, dir = %handle.dir.display(), "environment prepared");
        Ok(())
    }

    async fn clear(&self, handle: &EnvHandle) -> Result<()> {
        if tokio::fs::try_exists(&handle.dir).await? {
            tokio::fs::remove_dir_all(&handle.dir).await?;
        }
        tracing::debug!(job_id = %handle.job_id, "environment cleared");
        Ok(())
    }
}
