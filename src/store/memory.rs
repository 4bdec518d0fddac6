use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{MillError, Result};
use crate::store::job::{
    Claim, ClaimedJob, JobRecord, JobSnapshot, JobStatus, NewJob, Ownership, Transition,
};
use crate::store::JobStore;

/// In-memory job store implementing the conditional-transition contract.
///
/// All guards live inside a single lock so each operation is atomic with
/// respect to concurrent claim/complete/timeout attempts.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<Uuid, JobRecord>,
    owners: Vec<Ownership>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| MillError::StoreUnavailable("job table lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| MillError::StoreUnavailable("job table lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: Uuid, job: NewJob, principal: &str) -> Result<()> {
        let mut tables = self.write()?;
        if tables.jobs.contains_key(&id) {
            return Err(MillError::DuplicateJob(id));
        }
        tables.jobs.insert(id, JobRecord::new(id, job, Utc::now()));
        tables.owners.push(Ownership {
            principal: principal.to_string(),
            job_id: id,
        });
        tracing::debug!(job_id = %id, principal, "job record created");
        Ok(())
    }

    async fn claim(&self, id: Uuid) -> Result<Claim> {
        let mut tables = self.write()?;
        match tables.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok(Claim::Claimed(ClaimedJob {
                    id: job.id,
                    script: job.script.clone(),
                    timeout: job.timeout,
                }))
            }
            Some(job) => {
                tracing::debug!(job_id = %id, status = %job.status, "claim skipped");
                Ok(Claim::Skipped)
            }
            None => {
                tracing::warn!(job_id = %id, "claim for unknown job skipped");
                Ok(Claim::Skipped)
            }
        }
    }

    async fn complete(&self, id: Uuid, result: Vec<u8>) -> Result<Transition> {
        let mut tables = self.write()?;
        match tables.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Completed;
                job.finished_at = Some(Utc::now());
                job.result = result;
                Ok(Transition::Applied)
            }
            _ => Ok(Transition::Ignored),
        }
    }

    async fn fail(&self, id: Uuid, diagnostic: Vec<u8>) -> Result<Transition> {
        let mut tables = self.write()?;
        match tables.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                job.result = diagnostic;
                Ok(Transition::Applied)
            }
            _ => Ok(Transition::Ignored),
        }
    }

    async fn force_timeout(&self, id: Uuid) -> Result<Transition> {
        let now = Utc::now();
        let mut tables = self.write()?;
        match tables.jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() && job.deadline_exceeded(now) => {
                job.status = JobStatus::TimedOut;
                job.finished_at = Some(now);
                Ok(Transition::Applied)
            }
            _ => Ok(Transition::Ignored),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobSnapshot>> {
        let tables = self.read()?;
        Ok(tables.jobs.get(&id).map(JobSnapshot::from))
    }

    async fn overdue(&self, grace: Duration) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let tables = self.read()?;
        Ok(tables
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal() && j.overdue(grace, now))
            .map(|j| j.id)
            .collect())
    }

    async fn jobs_of(&self, principal: &str) -> Result<Vec<Uuid>> {
        let tables = self.read()?;
        Ok(tables
            .owners
            .iter()
            .filter(|o| o.principal == principal)
            .map(|o| o.job_id)
            .collect())
    }
}
