//! Submission entry point. The ordering contract is the whole point:
//! validate first, create the store record (with ownership), and only
//! then publish to the queue, so no consumer can ever see a job id with
//! no backing record.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::JobProducer;
use crate::config::GatewayConfig;
use crate::error::{MillError, Result};
use crate::store::{JobSnapshot, JobStore, NewJob};

const PUBLISH_RETRIES: u32 = 3;
const PUBLISH_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub script: String,
    pub timeout: Duration,
}

pub struct SubmissionGateway {
    store: Arc<dyn JobStore>,
    producer: Arc<dyn JobProducer>,
    principal: String,
    config: GatewayConfig,
}

impl SubmissionGateway {
    pub fn new(
        store: Arc<dyn JobStore>,
        producer: Arc<dyn JobProducer>,
        principal: impl Into<String>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            producer,
            principal: principal.into(),
            config,
        }
    }

    pub async fn submit(&self, request: SubmitRequest, token: &CancellationToken) -> Result<Uuid> {
        self.validate(&request)?;

        let job_id = Uuid::new_v4();
        let new_job = NewJob {
            script: request.script,
            timeout: request.timeout,
        };
        self.store.create(job_id, new_job, &self.principal).await?;
        tracing::info!(job_id = %job_id, principal = %self.principal, "job created");

        self.publish_with_retry(job_id, token).await?;
        tracing::info!(job_id = %job_id, "job published");
        Ok(job_id)
    }

    pub async fn get_result(&self, job_id: Uuid) -> Result<Option<JobSnapshot>> {
        self.store.get(job_id).await
    }

    pub async fn jobs_of_submitter(&self) -> Result<Vec<Uuid>> {
        self.store.jobs_of(&self.principal).await
    }

    fn validate(&self, request: &SubmitRequest) -> Result<()> {
        if request.script.trim().is_empty() {
            return Err(MillError::Validation("script must not be empty".to_string()));
        }
        if request.script.len() > self.config.max_script_bytes {
            return Err(MillError::Validation(format!(
                "script exceeds {} bytes",
                self.config.max_script_bytes
            )));
        }
        if request.timeout < self.config.min_timeout || request.timeout > self.config.max_timeout {
            return Err(MillError::Validation(format!(
                "timeout must be between {:?} and {:?}",
                self.config.min_timeout, self.config.max_timeout
            )));
        }
        Ok(())
    }

    /// The record already exists when publishing starts; on persistent
    /// failure the error is surfaced and the orphaned Pending record is
    /// left for the watchdog to time out.
    async fn publish_with_retry(&self, job_id: Uuid, token: &CancellationToken) -> Result<()> {
        for attempt in 1..=PUBLISH_RETRIES {
            match self.producer.publish(job_id, token).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < PUBLISH_RETRIES => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "publish failed, retrying");
                    tokio::time::sleep(PUBLISH_BACKOFF * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %e,
                        "job created but not published; the watchdog will reclaim it"
                    );
                    return Err(e);
                }
            }
        }
        Err(MillError::BrokerUnavailable(
            "publish retries exhausted".to_string(),
        ))
    }
}
