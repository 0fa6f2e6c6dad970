use sqlx::{sqlite::SqliteRow, QueryBuilder, Row};

use parley_core::domain::conversation::{ConversationId, OrganizationId};
use parley_core::domain::message::{AuthorKind, MessageId, TriggerMessage};

use super::conversation::parse_timestamp;
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn save(
        &self,
        conversation_id: &ConversationId,
        organization_id: &OrganizationId,
        message: TriggerMessage,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO message (id, conversation_id, organization_id, author_kind, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                organization_id = excluded.organization_id,
                author_kind = excluded.author_kind,
                created_at = excluded.created_at",
        )
        .bind(&message.id.0)
        .bind(&conversation_id.0)
        .bind(&organization_id.0)
        .bind(message.author.map(|author| author.as_str()))
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_ids(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> Result<Vec<TriggerMessage>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::new(
            "SELECT id, author_kind, created_at FROM message WHERE conversation_id = ",
        );
        builder.push_bind(&conversation_id.0);
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(&id.0);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn latest_triggerable(
        &self,
        organization_id: &OrganizationId,
        conversation_id: &ConversationId,
    ) -> Result<Option<TriggerMessage>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, author_kind, created_at
             FROM message
             WHERE conversation_id = ? AND organization_id = ?
               AND author_kind IN ('visitor', 'member')
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(&conversation_id.0)
        .bind(&organization_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }
}

fn message_from_row(row: SqliteRow) -> Result<TriggerMessage, RepositoryError> {
    let author = row
        .try_get::<Option<String>, _>("author_kind")?
        .map(|value| {
            AuthorKind::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown author kind `{value}`")))
        })
        .transpose()?;

    Ok(TriggerMessage {
        id: MessageId(row.try_get("id")?),
        author,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
