use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    /// Terminal states accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Creation request for a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub script: String,
    pub timeout: Duration,
}

/// Full job record as persisted by the store.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub script: String,
    pub result: Vec<u8>,
}

impl JobRecord {
    pub fn new(id: Uuid, job: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            timeout: job.timeout,
            created_at,
            started_at: None,
            finished_at: None,
            script: job.script,
            result: Vec::new(),
        }
    }

    /// Moment the execution deadline starts counting from.
    fn deadline_base(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    /// Absolute deadline; `None` when the timeout pushes it past the
    /// representable time range, which reads as "never".
    fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.deadline_base()
            .checked_add_signed(to_chrono(self.timeout))
    }

    /// True once the job's own deadline has elapsed.
    pub fn deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.deadline_at().is_some_and(|deadline| now > deadline)
    }

    /// True once the job counts as lost: past its deadline plus the grace
    /// window the watchdog allows for a tardy worker.
    pub fn overdue(&self, grace: Duration, now: DateTime<Utc>) -> bool {
        self.deadline_at()
            .and_then(|deadline| deadline.checked_add_signed(to_chrono(grace)))
            .is_some_and(|deadline| now > deadline)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::max_value())
}

/// What a worker needs to execute a claimed job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub script: String,
    pub timeout: Duration,
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone)]
pub enum Claim {
    /// This caller now owns the job.
    Claimed(ClaimedJob),
    /// Already owned or terminal; redelivery degrades to a no-op.
    Skipped,
}

/// Outcome of a conditional transition. A lost race is a benign no-op,
/// never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

/// Read-only projection returned to clients. Non-terminal snapshots carry
/// no finish timestamp and an empty result.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Vec<u8>,
}

impl From<&JobRecord> for JobSnapshot {
    fn from(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            started_at: record.started_at,
            finished_at: record.finished_at,
            result: record.result.clone(),
        }
    }
}

/// Immutable mapping of a submitting principal to a job it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub principal: String,
    pub job_id: Uuid,
}
