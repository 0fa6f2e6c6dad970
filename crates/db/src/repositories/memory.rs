use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::domain::conversation::{AiCursor, Conversation, ConversationId, OrganizationId};
use parley_core::domain::message::{MessageId, TriggerMessage};

use super::{ConversationRepository, MessageRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    async fn set_ai_paused_until(
        &self,
        id: &ConversationId,
        organization_id: &OrganizationId,
        paused_until: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(&id.0) {
            Some(conversation) if conversation.organization_id == *organization_id => {
                conversation.ai_paused_until = paused_until;
                conversation.updated_at = Utc::now();
                Ok(Some(conversation.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_ai_cursor(
        &self,
        id: &ConversationId,
        organization_id: &OrganizationId,
        cursor: AiCursor,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(&id.0) {
            if conversation.organization_id == *organization_id {
                conversation.ai_cursor = Some(cursor);
                conversation.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<String, Vec<(OrganizationId, TriggerMessage)>>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn save(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
        message: TriggerMessage,
    ) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        let entries = messages.entry(conversation_id.0.clone()).or_default();
        entries.retain(|(_, existing)| existing.id != message.id);
        entries.push((organization_id.clone(), message));
        Ok(())
    }

    async fn list_by_ids(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> Result<Vec<TriggerMessage>, RepositoryError> {
        let messages = self.messages.read().await;
        let entries = messages.get(&conversation_id.0);
        Ok(entries
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, message)| ids.contains(&message.id))
                    .map(|(_, message)| message.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_triggerable(
        &self,
        organization_id: &OrganizationId,
        conversation_id: &ConversationId,
    ) -> Result<Option<TriggerMessage>, RepositoryError> {
        let messages = self.messages.read().await;
        let latest = messages.get(&conversation_id.0).and_then(|entries| {
            entries
                .iter()
                .filter(|(org, message)| org == organization_id && message.is_triggerable())
                .max_by(|(_, a), (_, b)| {
                    a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0))
                })
                .map(|(_, message)| message.clone())
        });
        Ok(latest)
    }
}
