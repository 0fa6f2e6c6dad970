use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use parley_core::domain::conversation::{AiCursor, Conversation, ConversationId, OrganizationId};
use parley_core::domain::message::{MessageId, TriggerMessage};

pub mod conversation;
pub mod memory;
pub mod message;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryMessageRepository};
pub use message::SqlMessageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable conversation store. Writes that take an organization id are
/// conditional updates scoped to `(conversation_id, organization_id)`; a write
/// affecting zero rows returns `None` (wrong tenant or missing row), never an
/// error.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;

    async fn set_ai_paused_until(
        &self,
        id: &ConversationId,
        organization_id: &OrganizationId,
        paused_until: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn update_ai_cursor(
        &self,
        id: &ConversationId,
        organization_id: &OrganizationId,
        cursor: AiCursor,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
        message: TriggerMessage,
    ) -> Result<(), RepositoryError>;

    /// Fetch metadata for a set of queued message ids. Missing ids are simply
    /// absent from the result; the coalescer treats a gap as a stop signal.
    async fn list_by_ids(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> Result<Vec<TriggerMessage>, RepositoryError>;

    /// Most recent visitor- or member-authored message, used to advance the
    /// agent cursor when a pause begins.
    async fn latest_triggerable(
        &self,
        organization_id: &OrganizationId,
        conversation_id: &ConversationId,
    ) -> Result<Option<TriggerMessage>, RepositoryError>;
}
