//! Durable job records and the conditional state machine over them.
//!
//! Every mutation is a conditional update guarded by the expected current
//! status. A lost race (the precondition no longer holds) is reported as
//! [`Transition::Ignored`], never as an error: redelivery and watchdog
//! races are part of normal operation.

mod job;
mod memory;

pub use job::{
    Claim, ClaimedJob, JobRecord, JobSnapshot, JobStatus, NewJob, Ownership, Transition,
};
pub use memory::MemoryJobStore;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new Pending job and its ownership record atomically.
    /// Fails only on a duplicate id, which is a caller error.
    async fn create(&self, id: Uuid, job: NewJob, principal: &str) -> Result<()>;

    /// Pending -> Running iff the job is still Pending; sets `started_at`
    /// exactly once. Anything else yields [`Claim::Skipped`].
    async fn claim(&self, id: Uuid) -> Result<Claim>;

    /// Running -> Completed; sets `finished_at` and the result payload.
    async fn complete(&self, id: Uuid, result: Vec<u8>) -> Result<Transition>;

    /// Running -> Failed; sets `finished_at` and the diagnostic payload.
    async fn fail(&self, id: Uuid, diagnostic: Vec<u8>) -> Result<Transition>;

    /// {Pending, Running} -> TimedOut iff the job's own deadline has elapsed.
    async fn force_timeout(&self, id: Uuid) -> Result<Transition>;

    /// Read-only projection; `None` for unknown ids.
    async fn get(&self, id: Uuid) -> Result<Option<JobSnapshot>>;

    /// Ids of non-terminal jobs past `timeout + grace`, for the watchdog.
    async fn overdue(&self, grace: Duration) -> Result<Vec<Uuid>>;

    /// Jobs owned by a principal, oldest first.
    async fn jobs_of(&self, principal: &str) -> Result<Vec<Uuid>>;
}
