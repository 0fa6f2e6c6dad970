//! Job-processing loop.
//!
//! One pass: pull every pending job for the next conversation with work,
//! coalesce the leading visitor burst into a single effective trigger, check
//! the pause state, invoke the generation pipeline, then either record the
//! outbound message (possibly tripping the rogue breaker) or resolve the
//! failure against the bounded-retry policy. Delivery is at-least-once:
//! jobs stay queued until acknowledged, so any step may be re-run by this or
//! another worker.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use parley_core::coalesce::coalesce;
use parley_core::domain::message::MessageId;
use parley_core::failure::{resolve, RetryVerdict};
use parley_db::repositories::{ConversationRepository, MessageRepository, RepositoryError};

use crate::pause::{PauseController, PauseError};
use crate::pipeline::ReplyPipeline;
use crate::queue::{QueueError, TriggerQueue};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Pause(#[from] PauseError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing queued.
    Idle,
    /// The agent is paused for this conversation; the batch was discarded.
    SkippedPaused,
    /// The conversation (or the head message's metadata) no longer exists.
    SkippedStale,
    Replied { message_id: MessageId, coalesced: usize, auto_paused: bool },
    Retried { failure_count: u32 },
    Dropped { failure_count: u32 },
}

pub struct ReplyWorker {
    queue: Arc<dyn TriggerQueue>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    pipeline: Arc<dyn ReplyPipeline>,
    guard: Arc<PauseController>,
    retry_threshold: u32,
}

impl ReplyWorker {
    pub fn new(
        queue: Arc<dyn TriggerQueue>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        pipeline: Arc<dyn ReplyPipeline>,
        guard: Arc<PauseController>,
        retry_threshold: u32,
    ) -> Self {
        Self { queue, conversations, messages, pipeline, guard, retry_threshold }
    }

    /// Process the next conversation's pending jobs, if any.
    pub async fn process_next(&self) -> Result<JobOutcome, WorkerError> {
        let Some(jobs) = self.queue.dequeue_conversation().await? else {
            return Ok(JobOutcome::Idle);
        };
        let head_job = &jobs[0];
        let conversation_id = head_job.conversation_id.clone();
        let correlation_id = head_job.correlation_id.clone();

        let all_ids: Vec<MessageId> = jobs.iter().map(|job| job.message_id.clone()).collect();
        let metadata: HashMap<MessageId, _> = self
            .messages
            .list_by_ids(&conversation_id, &all_ids)
            .await?
            .into_iter()
            .map(|message| (message.id.clone(), message))
            .collect();

        let Some(head) = metadata.get(&head_job.message_id) else {
            // The triggering message was deleted out from under the job.
            self.queue.acknowledge(&conversation_id, &all_ids[..1]).await?;
            tracing::warn!(
                event_name = "worker.job.stale_message",
                conversation_id = %conversation_id.0,
                message_id = %head_job.message_id.0,
                correlation_id = %correlation_id,
                "dropping job for missing message"
            );
            return Ok(JobOutcome::SkippedStale);
        };

        let batch = coalesce(head, &all_ids[1..], &metadata);

        let Some(conversation) = self.conversations.find_by_id(&conversation_id).await? else {
            self.queue.acknowledge(&conversation_id, &batch.coalesced_message_ids).await?;
            tracing::warn!(
                event_name = "worker.job.stale_conversation",
                conversation_id = %conversation_id.0,
                correlation_id = %correlation_id,
                "dropping batch for missing conversation"
            );
            return Ok(JobOutcome::SkippedStale);
        };

        // The row just fetched supplies the fallback timestamp, so the
        // durable tier would be a redundant second read.
        let paused = self
            .guard
            .is_paused(&conversation_id, conversation.ai_paused_until, true)
            .await?;
        if paused {
            self.queue.acknowledge(&conversation_id, &batch.coalesced_message_ids).await?;
            tracing::info!(
                event_name = "worker.job.skipped_paused",
                conversation_id = %conversation_id.0,
                correlation_id = %correlation_id,
                discarded = batch.coalesced_message_ids.len(),
                "agent paused, discarding batch"
            );
            return Ok(JobOutcome::SkippedPaused);
        }

        let effective_id = batch.effective_message.id.clone();
        match self.pipeline.generate(&conversation, &batch.effective_message).await {
            Ok(reply) => {
                self.queue.acknowledge(&conversation_id, &batch.coalesced_message_ids).await?;
                // A batch that grew between retries moved the effective id,
                // so counters for absorbed jobs must go too.
                for id in &batch.coalesced_message_ids {
                    self.queue.clear_failure_counter(&conversation_id, id).await?;
                }

                let check = self
                    .guard
                    .record_outbound_and_maybe_auto_pause(
                        &conversation_id,
                        &conversation.organization_id,
                        &reply.message_id,
                    )
                    .await?;

                tracing::info!(
                    event_name = "worker.job.replied",
                    conversation_id = %conversation_id.0,
                    correlation_id = %correlation_id,
                    effective_message_id = %effective_id.0,
                    outbound_message_id = %reply.message_id.0,
                    coalesced = batch.coalesced_message_ids.len(),
                    auto_paused = check.paused,
                    "agent reply recorded"
                );

                Ok(JobOutcome::Replied {
                    message_id: reply.message_id,
                    coalesced: batch.coalesced_message_ids.len(),
                    auto_paused: check.paused,
                })
            }
            Err(error) => {
                let failure_count =
                    self.queue.record_failure(&conversation_id, &effective_id).await?;

                match resolve(error.retryable, failure_count, self.retry_threshold) {
                    RetryVerdict::Retry => {
                        tracing::warn!(
                            event_name = "worker.job.retry_scheduled",
                            conversation_id = %conversation_id.0,
                            correlation_id = %correlation_id,
                            effective_message_id = %effective_id.0,
                            failure_count,
                            error = %error,
                            "generation failed, leaving batch queued"
                        );
                        Ok(JobOutcome::Retried { failure_count })
                    }
                    RetryVerdict::Drop => {
                        self.queue
                            .acknowledge(&conversation_id, &batch.coalesced_message_ids)
                            .await?;
                        for id in &batch.coalesced_message_ids {
                            self.queue.clear_failure_counter(&conversation_id, id).await?;
                        }
                        tracing::error!(
                            event_name = "worker.job.dropped",
                            conversation_id = %conversation_id.0,
                            correlation_id = %correlation_id,
                            effective_message_id = %effective_id.0,
                            failure_count,
                            error = %error,
                            "generation failed permanently, dropping batch"
                        );
                        Ok(JobOutcome::Dropped { failure_count })
                    }
                }
            }
        }
    }
}
