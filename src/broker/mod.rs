//! Ordered, partitioned, at-least-once work queue.
//!
//! The wire envelope is deliberately minimal: the job id is both routing key
//! and payload, so every mutable fact lives in the store and a redelivered
//! message is always safe to re-evaluate. Partitioning by key keeps all
//! messages for one job strictly ordered and owned by a single consumer of
//! the group at a time.

mod memory;

pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer};

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{BrokerConfig, JOBS_TOPIC};
use crate::error::{MillError, Result};

/// Length of the fixed-width binary job id used as key and payload.
pub const KEY_LEN: usize = 16;

/// A message handed to a consumer. Raw bytes plus its queue position;
/// decoding happens at the consumer boundary so a malformed message can be
/// skipped instead of crashing the loop.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub key: [u8; KEY_LEN],
    pub payload: [u8; KEY_LEN],
    pub partition: usize,
    pub offset: u64,
}

impl Delivery {
    /// Decode the job id, checking key/payload consistency.
    pub fn job_id(&self) -> Result<Uuid> {
        let key = Uuid::from_bytes(self.key);
        let payload = Uuid::from_bytes(self.payload);
        if key.is_nil() {
            return Err(MillError::MalformedMessage("nil key".to_string()));
        }
        if key != payload {
            return Err(MillError::MalformedMessage(format!(
                "key {key} does not match payload {payload}"
            )));
        }
        Ok(key)
    }
}

#[async_trait]
pub trait JobProducer: Send + Sync {
    /// Publish a work item for `job_id`, keyed by the id itself.
    async fn publish(&self, job_id: Uuid, token: &CancellationToken) -> Result<()>;
}

#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Wait up to `timeout` for the next uncommitted message on one of this
    /// consumer's assigned partitions. An uncommitted message is returned
    /// again on every subsequent poll until it is committed.
    async fn poll(&self, timeout: Duration, token: &CancellationToken)
        -> Result<Option<Delivery>>;

    /// Advance the committed offset past `delivery`. Must only be called
    /// after the store has durably recorded the job's terminal (or
    /// already-terminal) state.
    async fn commit(&self, delivery: &Delivery) -> Result<()>;
}

/// Resource a permission applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Topic(String),
    Group(String),
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Topic(name) => write!(f, "topic {name}"),
            Resource::Group(name) => write!(f, "group {name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclOp {
    Read,
    Write,
}

#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Create a topic; a no-op when it already exists.
    async fn create_topic(
        &self,
        name: &str,
        partitions: usize,
        replication_factor: u16,
    ) -> Result<()>;

    /// Grant `op` on `resource` to `principal`; idempotent.
    async fn allow(&self, resource: Resource, op: AclOp, principal: &str) -> Result<()>;

    /// Revoke a previously granted permission; idempotent.
    async fn deny(&self, resource: Resource, op: AclOp, principal: &str) -> Result<()>;
}

/// One-time provisioning of the work topic and its access grants.
///
/// Creates the topic with the admin-side partition count and replication
/// factor, then grants write access to the submitting principal and read
/// access (topic and group) to the worker principal. Safe to re-run.
pub async fn provision(admin: &dyn BrokerAdmin, config: &BrokerConfig) -> Result<()> {
    admin
        .create_topic(JOBS_TOPIC, config.partitions, config.replication_factor)
        .await?;
    admin
        .allow(
            Resource::Topic(JOBS_TOPIC.to_string()),
            AclOp::Write,
            &config.submitter_principal,
        )
        .await?;
    admin
        .allow(
            Resource::Topic(JOBS_TOPIC.to_string()),
            AclOp::Read,
            &config.worker_principal,
        )
        .await?;
    admin
        .allow(
            Resource::Group(config.group_id.clone()),
            AclOp::Read,
            &config.worker_principal,
        )
        .await?;
    tracing::info!(
        topic = JOBS_TOPIC,
        partitions = config.partitions,
        group = %config.group_id,
        "broker provisioned"
    );
    Ok(())
}
