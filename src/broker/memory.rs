use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{AclOp, BrokerAdmin, Delivery, JobConsumer, JobProducer, Resource};
use crate::error::{MillError, Result};

/// In-process broker implementing the work-queue protocol: fixed partitions,
/// key-hash routing, consumer groups with exclusive partition assignment,
/// manual offset commits and at-least-once redelivery of anything
/// uncommitted.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    acls: HashSet<(Resource, AclOp, String)>,
    // Keyed by (topic, group).
    groups: HashMap<(String, String), Group>,
    next_member: u64,
}

struct Topic {
    partitions: Vec<Vec<Message>>,
}

#[derive(Clone)]
struct Message {
    key: [u8; 16],
    payload: [u8; 16],
}

struct Group {
    members: Vec<u64>,
    committed: Vec<u64>,
}

impl State {
    fn check_acl(&self, resource: &Resource, op: AclOp, principal: &str) -> Result<()> {
        let granted = self
            .acls
            .contains(&(resource.clone(), op, principal.to_string()));
        if granted {
            Ok(())
        } else {
            Err(MillError::AccessDenied {
                principal: principal.to_string(),
                operation: match op {
                    AclOp::Read => "read",
                    AclOp::Write => "write",
                },
                resource: resource.to_string(),
            })
        }
    }
}

fn partition_for(key: &[u8; 16], partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|_| MillError::BrokerUnavailable("broker state lock poisoned".to_string()))
    }

    /// Producer handle publishing as `principal`.
    pub fn producer(&self, topic: &str, principal: &str) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
            topic: topic.to_string(),
            principal: principal.to_string(),
        }
    }

    /// Join `group` on `topic` as `principal`. Partition assignment is
    /// recomputed over the group members; committed offsets are shared by
    /// the group, so a new member resumes from the last commit.
    pub fn subscribe(&self, topic: &str, group: &str, principal: &str) -> Result<MemoryConsumer> {
        let member_id = {
            let mut state = self.lock()?;
            let partitions = state
                .topics
                .get(topic)
                .ok_or_else(|| MillError::UnknownTopic(topic.to_string()))?
                .partitions
                .len();
            state.check_acl(&Resource::Topic(topic.to_string()), AclOp::Read, principal)?;
            state.check_acl(&Resource::Group(group.to_string()), AclOp::Read, principal)?;

            let member_id = state.next_member;
            state.next_member += 1;
            let entry = state
                .groups
                .entry((topic.to_string(), group.to_string()))
                .or_insert_with(|| Group {
                    members: Vec::new(),
                    committed: vec![0; partitions],
                });
            entry.members.push(member_id);
            member_id
        };
        tracing::info!(topic, group, member_id, "consumer subscribed");
        Ok(MemoryConsumer {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            member_id,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Committed offsets per partition for a group; introspection hook used
    /// by operators and tests.
    pub fn committed_offsets(&self, topic: &str, group: &str) -> Result<Option<Vec<u64>>> {
        let state = self.lock()?;
        Ok(state
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|g| g.committed.clone()))
    }
}

#[async_trait]
impl BrokerAdmin for MemoryBroker {
    async fn create_topic(
        &self,
        name: &str,
        partitions: usize,
        replication_factor: u16,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(existing) = state.topics.get(name) {
            tracing::debug!(
                topic = name,
                partitions = existing.partitions.len(),
                "topic already exists, keeping it"
            );
            return Ok(());
        }
        state.topics.insert(
            name.to_string(),
            Topic {
                partitions: vec![Vec::new(); partitions.max(1)],
            },
        );
        tracing::info!(topic = name, partitions, replication_factor, "topic created");
        Ok(())
    }

    async fn allow(&self, resource: Resource, op: AclOp, principal: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.acls.insert((resource.clone(), op, principal.to_string())) {
            tracing::info!(%resource, ?op, principal, "access granted");
        }
        Ok(())
    }

    async fn deny(&self, resource: Resource, op: AclOp, principal: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.acls.remove(&(resource.clone(), op, principal.to_string())) {
            tracing::info!(%resource, ?op, principal, "access revoked");
        }
        Ok(())
    }
}

/// Producer half of a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
    topic: String,
    principal: String,
}

#[async_trait]
impl JobProducer for MemoryProducer {
    async fn publish(&self, job_id: Uuid, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(MillError::BrokerUnavailable(
                "publish cancelled by shutdown".to_string(),
            ));
        }
        {
            let mut state = self.broker.lock()?;
            state.check_acl(
                &Resource::Topic(self.topic.clone()),
                AclOp::Write,
                &self.principal,
            )?;
            let topic = state
                .topics
                .get_mut(&self.topic)
                .ok_or_else(|| MillError::UnknownTopic(self.topic.clone()))?;
            let key = *job_id.as_bytes();
            let partition = partition_for(&key, topic.partitions.len());
            topic.partitions[partition].push(Message { key, payload: key });
            tracing::debug!(job_id = %job_id, topic = %self.topic, partition, "message published");
        }
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }
}

/// Consumer half of a [`MemoryBroker`]; one member of a consumer group.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    topic: String,
    group: String,
    member_id: u64,
    cursor: AtomicUsize,
}

impl std::fmt::Debug for MemoryConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConsumer")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("member_id", &self.member_id)
            .finish_non_exhaustive()
    }
}

impl MemoryConsumer {
    /// First uncommitted message on one of this member's partitions, if any.
    /// Scanning starts at a rotating cursor so no partition is starved.
    fn try_fetch(&self) -> Result<Option<Delivery>> {
        let state = self.broker.lock()?;
        let topic = state
            .topics
            .get(&self.topic)
            .ok_or_else(|| MillError::UnknownTopic(self.topic.clone()))?;
        let Some(group) = state
            .groups
            .get(&(self.topic.clone(), self.group.clone()))
        else {
            return Ok(None);
        };
        let Some(my_index) = group.members.iter().position(|&m| m == self.member_id) else {
            return Ok(None);
        };

        let partitions = topic.partitions.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % partitions;
        for i in 0..partitions {
            let p = (start + i) % partitions;
            if p % group.members.len() != my_index {
                continue;
            }
            let committed = group.committed[p];
            if let Some(message) = topic.partitions[p].get(committed as usize) {
                return Ok(Some(Delivery {
                    key: message.key,
                    payload: message.payload,
                    partition: p,
                    offset: committed,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobConsumer for MemoryConsumer {
    async fn poll(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before checking state so a publish between
            // the check and the await is not missed.
            let notified = self.broker.inner.notify.notified();
            tokio::pin!(notified);

            if let Some(delivery) = self.try_fetch()? {
                return Ok(Some(delivery));
            }
            if token.is_cancelled() || Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.broker.lock()?;
        let Some(group) = state
            .groups
            .get_mut(&(self.topic.clone(), self.group.clone()))
        else {
            return Err(MillError::BrokerUnavailable(format!(
                "group [{}] is gone",
                self.group
            )));
        };
        let slot = &mut group.committed[delivery.partition];
        *slot = (*slot).max(delivery.offset + 1);
        tracing::debug!(
            topic = %self.topic,
            group = %self.group,
            partition = delivery.partition,
            offset = delivery.offset,
            "offset committed"
        );
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        // Leave the group so our partitions are reassigned; anything we
        // consumed but never committed will be redelivered to the new owner.
        if let Ok(mut state) = self.broker.inner.state.lock() {
            if let Some(group) = state
                .groups
                .get_mut(&(self.topic.clone(), self.group.clone()))
            {
                group.members.retain(|&m| m != self.member_id);
            }
        }
        self.broker.inner.notify.notify_waiters();
    }
}
