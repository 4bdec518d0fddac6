//! Worker side of the pipeline: consume a job id from the queue, gate it
//! through admission control, claim it in the store, execute the script in
//! an isolated directory, record the outcome, then commit the offset.
//!
//! The offset commit always happens after the store transition, so a crash
//! between the two causes a redelivery that the conditional store update
//! turns into a no-op.

pub mod admission;
pub mod environment;
pub mod runner;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::{Delivery, JobConsumer};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::store::{Claim, ClaimedJob, JobStore, Transition};

pub use admission::{
    AdmissionController, CpuStat, DiskStat, LinuxResourceReader, MemStat, ResourceReader,
    RunningGauge,
};
pub use environment::{DirJobEnvironment, EnvHandle, JobEnvironment, SCRIPT_FILE};
pub use runner::{ProcessRunner, RunOutcome};

/// Sequential consume-and-execute loop. One worker handles one message at
/// a time; scale-out is more workers in the same consumer group.
pub struct ConsumerWorker {
    consumer: Arc<dyn JobConsumer>,
    store: Arc<dyn JobStore>,
    admission: Arc<AdmissionController>,
    environment: Arc<dyn JobEnvironment>,
    runner: Arc<ProcessRunner>,
    gauge: RunningGauge,
    config: WorkerConfig,
}

impl ConsumerWorker {
    pub fn new(
        consumer: Arc<dyn JobConsumer>,
        store: Arc<dyn JobStore>,
        admission: Arc<AdmissionController>,
        environment: Arc<dyn JobEnvironment>,
        runner: Arc<ProcessRunner>,
        gauge: RunningGauge,
        config: WorkerConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            admission,
            environment,
            runner,
            gauge,
            config,
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        tracing::info!("consumer worker started");
        while !token.is_cancelled() {
            if let Err(e) = self.iteration(&token).await {
                if e.is_transient() {
                    tracing::warn!(error = %e, "transient failure in worker iteration");
                } else {
                    tracing::error!(error = %e, "worker iteration failed");
                }
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.iteration_delay) => {}
            }
        }
        tracing::info!("consumer worker stopped");
    }

    async fn iteration(&self, token: &CancellationToken) -> Result<()> {
        let Some(delivery) = self.consumer.poll(self.config.poll_timeout, token).await? else {
            return Ok(());
        };

        // Admission is checked before claiming. A denial (or a probe
        // failure treated as one) leaves the message uncommitted so the
        // next poll redelivers it.
        let admitted = match self.admission.can_run_new_job(token).await {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!(error = %e, "resource probe failed, deferring new work");
                false
            }
        };
        if !admitted {
            return Ok(());
        }

        let job_id = match delivery.job_id() {
            Ok(job_id) => job_id,
            Err(e) => {
                // A malformed message would be redelivered forever; skip it.
                tracing::warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "skipping malformed queue message"
                );
                self.consumer.commit(&delivery).await?;
                return Ok(());
            }
        };

        let job = match self.store.claim(job_id).await? {
            Claim::Claimed(job) => job,
            Claim::Skipped => {
                // Another worker won the claim race or the job is already
                // terminal; the message is spent either way.
                tracing::debug!(job_id = %job_id, "claim skipped, committing offset");
                self.consumer.commit(&delivery).await?;
                return Ok(());
            }
        };

        let abandoned = self.execute(&job, token).await?;
        if abandoned {
            // No store write happened; leaving the offset uncommitted lets
            // another worker (or the watchdog) pick the job up.
            return Ok(());
        }
        self.finish(&delivery).await
    }

    async fn execute(&self, job: &ClaimedJob, token: &CancellationToken) -> Result<bool> {
        let _slot = self.gauge.enter();
        tracing::info!(job_id = %job.id, timeout = ?job.timeout, "executing job");

        let handle = self.environment.handle(job.id);
        let outcome = match self.environment.prepare(job, &handle).await {
            Ok(()) => self.runner.run(job, &handle, token).await,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "environment preparation failed");
                RunOutcome::Failed(format!("environment preparation failed: {e}").into_bytes())
            }
        };

        let abandoned = matches!(outcome, RunOutcome::Abandoned);
        let recorded = match outcome {
            RunOutcome::Completed(output) => Some(self.store.complete(job.id, output).await),
            RunOutcome::Failed(diagnostic) => Some(self.store.fail(job.id, diagnostic).await),
            RunOutcome::DeadlineExceeded(_) => Some(self.store.force_timeout(job.id).await),
            RunOutcome::Abandoned => None,
        };

        // Teardown runs no matter how recording went.
        if let Err(e) = self.environment.clear(&handle).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to clear job environment");
        }

        match recorded {
            Some(Ok(Transition::Applied)) => {
                tracing::info!(job_id = %job.id, "job outcome recorded");
            }
            Some(Ok(Transition::Ignored)) => {
                tracing::debug!(job_id = %job.id, "job outcome already recorded elsewhere");
            }
            Some(Err(e)) => return Err(e),
            None => {}
        }
        Ok(abandoned)
    }

    async fn finish(&self, delivery: &Delivery) -> Result<()> {
        self.consumer.commit(delivery).await
    }
}
