//! Queue boundary contracts.
//!
//! The trigger queue itself is a collaborator: it enqueues and dequeues jobs
//! and persists per-job failure counters across attempts. `QueueAdmin` is the
//! narrow capability `PauseController` needs (discard in-flight work when a
//! pause begins); `TriggerQueue` is the surface the worker loop consumes.
//! `InMemoryTriggerQueue` implements both for tests and single-process
//! deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use parley_core::domain::conversation::{ConversationId, OrganizationId};
use parley_core::domain::message::MessageId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// One unit of work: an inbound message that may cause an agent run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerJob {
    pub conversation_id: ConversationId,
    pub organization_id: OrganizationId,
    pub message_id: MessageId,
    pub correlation_id: String,
}

impl TriggerJob {
    /// Build a job with a freshly minted correlation id for log joining.
    pub fn new(
        conversation_id: ConversationId,
        organization_id: OrganizationId,
        message_id: MessageId,
    ) -> Self {
        Self {
            conversation_id,
            organization_id,
            message_id,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Capability handed to `PauseController`: a fresh pause discards the
/// conversation's in-flight work.
#[async_trait]
pub trait QueueAdmin: Send + Sync {
    async fn clear_queue_for_conversation(&self, id: &ConversationId) -> Result<(), QueueError>;

    async fn clear_failure_counters_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<(), QueueError>;
}

/// At-least-once job queue. Dequeueing peeks; jobs leave the queue only when
/// acknowledged, so a crashed worker's batch is re-delivered.
#[async_trait]
pub trait TriggerQueue: Send + Sync {
    async fn enqueue(&self, job: TriggerJob) -> Result<(), QueueError>;

    /// All pending jobs for the next conversation with work, oldest first.
    async fn dequeue_conversation(&self) -> Result<Option<Vec<TriggerJob>>, QueueError>;

    async fn acknowledge(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), QueueError>;

    /// Increment and persist the failure counter for one job, returning the
    /// new count.
    async fn record_failure(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<u32, QueueError>;

    async fn clear_failure_counter(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), QueueError>;
}

#[derive(Default)]
struct QueueState {
    pending: Vec<TriggerJob>,
    failures: HashMap<(String, String), u32>,
}

#[derive(Default)]
pub struct InMemoryTriggerQueue {
    state: RwLock<QueueState>,
}

#[async_trait]
impl TriggerQueue for InMemoryTriggerQueue {
    async fn enqueue(&self, job: TriggerJob) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.pending.push(job);
        Ok(())
    }

    async fn dequeue_conversation(&self) -> Result<Option<Vec<TriggerJob>>, QueueError> {
        let state = self.state.read().await;
        let Some(head) = state.pending.first() else {
            return Ok(None);
        };

        let conversation_id = head.conversation_id.clone();
        let jobs = state
            .pending
            .iter()
            .filter(|job| job.conversation_id == conversation_id)
            .cloned()
            .collect();
        Ok(Some(jobs))
    }

    async fn acknowledge(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.pending.retain(|job| {
            job.conversation_id != *conversation_id || !message_ids.contains(&job.message_id)
        });
        Ok(())
    }

    async fn record_failure(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<u32, QueueError> {
        let mut state = self.state.write().await;
        let count = state
            .failures
            .entry((conversation_id.0.clone(), message_id.0.clone()))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_failure_counter(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.failures.remove(&(conversation_id.0.clone(), message_id.0.clone()));
        Ok(())
    }
}

#[async_trait]
impl QueueAdmin for InMemoryTriggerQueue {
    async fn clear_queue_for_conversation(&self, id: &ConversationId) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.pending.retain(|job| job.conversation_id != *id);
        Ok(())
    }

    async fn clear_failure_counters_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.failures.retain(|(conversation, _), _| conversation != &id.0);
        Ok(())
    }
}
