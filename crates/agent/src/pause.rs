//! Pause arbitration for the automated agent.
//!
//! `PauseController` is the single source of truth for "may the agent act on
//! this conversation right now". Reads go through an ephemeral cache keyed
//! `paused:<conversation id>` whose entries exist only while a pause is in
//! effect; the durable conversation row is the final authority and the
//! recovery point of truth. Writes always land durably first; cache backfill,
//! queue clearing and window reset follow concurrently and best-effort.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use parley_core::config::GuardConfig;
use parley_core::domain::conversation::{AiCursor, Conversation, ConversationId, OrganizationId};
use parley_core::domain::message::MessageId;
use parley_db::repositories::{ConversationRepository, MessageRepository, RepositoryError};

use crate::queue::QueueAdmin;
use crate::store::{EphemeralStore, StoreError};
use crate::window::OutboundRateWindow;

/// Reason attached to pauses tripped by the rogue-rate breaker.
pub const AUTO_PAUSE_REASON: &str = "auto-rogue-protection";

#[derive(Debug, Error)]
pub enum PauseError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of recording one outbound automated message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RogueCheck {
    pub paused: bool,
    pub message_count: u64,
    pub pause_until: Option<DateTime<Utc>>,
}

pub struct PauseController {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    store: Arc<dyn EphemeralStore>,
    queue: Arc<dyn QueueAdmin>,
    window: OutboundRateWindow,
    config: GuardConfig,
}

impl PauseController {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        store: Arc<dyn EphemeralStore>,
        queue: Arc<dyn QueueAdmin>,
        config: GuardConfig,
    ) -> Self {
        let window = OutboundRateWindow::new(store.clone(), config.rogue_window_secs);
        Self { conversations, messages, store, queue, window, config }
    }

    fn paused_key(conversation_id: &ConversationId) -> String {
        format!("paused:{}", conversation_id.0)
    }

    /// Whether the agent is currently paused for this conversation.
    ///
    /// Lookup order: cache (existence alone implies paused, the cache never
    /// stores "not paused"), then a caller-supplied fallback timestamp, then
    /// the durable row. `skip_durable_lookup` short-circuits the final tier;
    /// the caller accepts a stale negative when a pause was durably written
    /// but has not reached the cache yet.
    pub async fn is_paused(
        &self,
        conversation_id: &ConversationId,
        fallback_paused_until: Option<DateTime<Utc>>,
        skip_durable_lookup: bool,
    ) -> Result<bool, PauseError> {
        if self.store.get(&Self::paused_key(conversation_id)).await?.is_some() {
            return Ok(true);
        }

        let now = Utc::now();
        if let Some(until) = fallback_paused_until {
            if until > now {
                self.backfill_cache(conversation_id, until, now).await;
                return Ok(true);
            }
        }

        if skip_durable_lookup {
            return Ok(false);
        }

        // The cache may expire slightly before the durable timestamp due to
        // TTL rounding; durable storage settles it.
        match self.conversations.find_by_id(conversation_id).await? {
            Some(conversation) => match conversation.ai_paused_until {
                Some(until) if until > now => {
                    self.backfill_cache(conversation_id, until, now).await;
                    Ok(true)
                }
                _ => Ok(false),
            },
            None => Ok(false),
        }
    }

    /// Pause the agent for `duration_minutes` (the configured default when
    /// `None`), extending but never shortening an existing pause. Returns
    /// `None` when the conversation is missing or belongs to a different
    /// organization.
    pub async fn pause(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
        duration_minutes: Option<u32>,
        reason: &str,
    ) -> Result<Option<Conversation>, PauseError> {
        let duration_minutes = duration_minutes.unwrap_or(self.config.default_pause_minutes);
        let Some(existing) = self.conversations.find_by_id(conversation_id).await? else {
            return Ok(None);
        };
        if existing.organization_id != *organization_id {
            tracing::warn!(
                event_name = "guard.pause.tenant_mismatch",
                conversation_id = %conversation_id.0,
                organization_id = %organization_id.0,
                "pause refused for conversation owned by another organization"
            );
            return Ok(None);
        }

        let now = Utc::now();
        let requested = now + Duration::minutes(i64::from(duration_minutes));
        let target = match existing.ai_paused_until {
            Some(current) if current > requested => current,
            _ => requested,
        };

        // Durable write first: everything after this point is recoverable
        // from the conversation row alone.
        let Some(updated) = self
            .conversations
            .set_ai_paused_until(conversation_id, organization_id, Some(target))
            .await?
        else {
            return Ok(None);
        };

        tracing::info!(
            event_name = "guard.pause.applied",
            conversation_id = %conversation_id.0,
            organization_id = %organization_id.0,
            pause_until = %target.to_rfc3339(),
            reason = reason,
            "agent paused for conversation"
        );

        let paused_key = Self::paused_key(conversation_id);
        let paused_value = target.to_rfc3339();
        let (cache, queue_clear, failures_clear, window_reset, cursor) = tokio::join!(
            self.store.set(&paused_key, &paused_value, cache_ttl(target, now)),
            self.queue.clear_queue_for_conversation(conversation_id),
            self.queue.clear_failure_counters_for_conversation(conversation_id),
            self.window.reset(conversation_id),
            self.advance_cursor(conversation_id, organization_id),
        );

        log_best_effort(conversation_id, "pause_cache_write", cache.err());
        log_best_effort(conversation_id, "queue_clear", queue_clear.err());
        log_best_effort(conversation_id, "failure_counters_clear", failures_clear.err());
        log_best_effort(conversation_id, "window_reset", window_reset.err());
        cursor?;

        Ok(Some(updated))
    }

    /// Lift the pause. Returns `None` only when the conversation is missing
    /// (or tenant-mismatched, which the conditional write treats the same).
    pub async fn resume(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
    ) -> Result<Option<Conversation>, PauseError> {
        let Some(updated) = self
            .conversations
            .set_ai_paused_until(conversation_id, organization_id, None)
            .await?
        else {
            return Ok(None);
        };

        // The cache entry must not outlive the cleared durable timestamp.
        self.store.delete(&Self::paused_key(conversation_id)).await?;

        tracing::info!(
            event_name = "guard.pause.lifted",
            conversation_id = %conversation_id.0,
            organization_id = %organization_id.0,
            "agent resumed for conversation"
        );

        Ok(Some(updated))
    }

    /// Record one outbound automated message and trip the rogue breaker when
    /// the rolling count exceeds the configured maximum.
    pub async fn record_outbound_and_maybe_auto_pause(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
        message_id: &MessageId,
    ) -> Result<RogueCheck, PauseError> {
        let message_count = self.window.record(conversation_id, message_id).await?;

        if message_count <= self.config.rogue_max_messages {
            return Ok(RogueCheck { paused: false, message_count, pause_until: None });
        }

        tracing::warn!(
            event_name = "guard.rogue.breaker_tripped",
            conversation_id = %conversation_id.0,
            message_count,
            rogue_max_messages = self.config.rogue_max_messages,
            "outbound rate exceeded, pausing agent"
        );

        let paused = self
            .pause(
                conversation_id,
                organization_id,
                Some(self.config.auto_pause_minutes),
                AUTO_PAUSE_REASON,
            )
            .await?;

        Ok(RogueCheck {
            paused: paused.is_some(),
            message_count,
            pause_until: paused.and_then(|conversation| conversation.ai_paused_until),
        })
    }

    /// Advance the agent cursor to the latest triggerable message, so a
    /// resumed agent does not catch up on messages that accumulated during
    /// the pause.
    async fn advance_cursor(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
    ) -> Result<(), RepositoryError> {
        let Some(latest) =
            self.messages.latest_triggerable(organization_id, conversation_id).await?
        else {
            return Ok(());
        };

        self.conversations
            .update_ai_cursor(
                conversation_id,
                organization_id,
                AiCursor { message_id: latest.id, message_created_at: latest.created_at },
            )
            .await
    }

    async fn backfill_cache(
        &self,
        conversation_id: &ConversationId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let result = self
            .store
            .set(&Self::paused_key(conversation_id), &until.to_rfc3339(), cache_ttl(until, now))
            .await;
        log_best_effort(conversation_id, "pause_cache_backfill", result.err());
    }
}

/// Remaining pause time rounded up to whole seconds, never below one second,
/// so the cache entry cannot outlive the durable timestamp by more than the
/// rounding slack.
fn cache_ttl(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let remaining_ms = (until - now).num_milliseconds().max(0);
    let secs = remaining_ms / 1000 + i64::from(remaining_ms % 1000 != 0);
    Duration::seconds(secs.max(1))
}

fn log_best_effort<E: std::fmt::Display>(
    conversation_id: &ConversationId,
    operation: &str,
    error: Option<E>,
) {
    if let Some(error) = error {
        tracing::warn!(
            event_name = "guard.pause.best_effort_failed",
            conversation_id = %conversation_id.0,
            operation,
            error = %error,
            "best-effort pause side effect failed"
        );
    }
}
