use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::conversation::{AiCursor, Conversation, ConversationId, OrganizationId};
use parley_core::domain::message::MessageId;

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                organization_id,
                ai_paused_until,
                ai_cursor_message_id,
                ai_cursor_message_created_at,
                created_at,
                updated_at
             FROM conversation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (
                id,
                organization_id,
                ai_paused_until,
                ai_cursor_message_id,
                ai_cursor_message_created_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                ai_paused_until = excluded.ai_paused_until,
                ai_cursor_message_id = excluded.ai_cursor_message_id,
                ai_cursor_message_created_at = excluded.ai_cursor_message_created_at,
                updated_at = excluded.updated_at",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.organization_id.0)
        .bind(conversation.ai_paused_until.map(|value| value.to_rfc3339()))
        .bind(conversation.ai_cursor.as_ref().map(|cursor| cursor.message_id.0.clone()))
        .bind(
            conversation
                .ai_cursor
                .as_ref()
                .map(|cursor| cursor.message_created_at.to_rfc3339()),
        )
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_ai_paused_until(
        &self,
        id: &ConversationId,
        organization_id: &OrganizationId,
        paused_until: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversation
             SET ai_paused_until = ?, updated_at = ?
             WHERE id = ? AND organization_id = ?",
        )
        .bind(paused_until.map(|value| value.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .bind(&organization_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    async fn update_ai_cursor(
        &self,
        id: &ConversationId,
        organization_id: &OrganizationId,
        cursor: AiCursor,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversation
             SET ai_cursor_message_id = ?, ai_cursor_message_created_at = ?, updated_at = ?
             WHERE id = ? AND organization_id = ?",
        )
        .bind(&cursor.message_id.0)
        .bind(cursor.message_created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .bind(&organization_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let cursor_message_id = row.try_get::<Option<String>, _>("ai_cursor_message_id")?;
    let cursor_created_at = parse_optional_timestamp(
        "ai_cursor_message_created_at",
        row.try_get("ai_cursor_message_created_at")?,
    )?;

    let ai_cursor = match (cursor_message_id, cursor_created_at) {
        (Some(message_id), Some(message_created_at)) => {
            Some(AiCursor { message_id: MessageId(message_id), message_created_at })
        }
        (None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(
                "ai cursor columns must be set together".to_string(),
            ))
        }
    };

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        ai_paused_until: parse_optional_timestamp(
            "ai_paused_until",
            row.try_get("ai_paused_until")?,
        )?,
        ai_cursor,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use parley_core::domain::conversation::{
        AiCursor, Conversation, ConversationId, OrganizationId,
    };
    use parley_core::domain::message::MessageId;

    use super::SqlConversationRepository;
    use crate::migrations;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn conversation(id: &str, org: &str) -> Conversation {
        let now = parse_ts("2026-08-01T12:00:00Z");
        Conversation {
            id: ConversationId(id.to_string()),
            organization_id: OrganizationId(org.to_string()),
            ai_paused_until: None,
            ai_cursor: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let mut conversation = conversation("C-SAVE-1", "org-1");
        conversation.ai_cursor = Some(AiCursor {
            message_id: MessageId("M-7".to_string()),
            message_created_at: parse_ts("2026-08-01T12:05:00Z"),
        });

        repo.save(conversation.clone()).await.expect("save conversation");
        let found = repo.find_by_id(&conversation.id).await.expect("find conversation");

        assert_eq!(found, Some(conversation));
        pool.close().await;
    }

    #[tokio::test]
    async fn set_ai_paused_until_writes_and_returns_the_row() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = conversation("C-PAUSE-1", "org-1");
        repo.save(conversation.clone()).await.expect("save conversation");

        let until = Utc::now() + Duration::minutes(30);
        let updated = repo
            .set_ai_paused_until(&conversation.id, &conversation.organization_id, Some(until))
            .await
            .expect("set pause");

        let updated = updated.expect("conversation should be found");
        assert_eq!(
            updated.ai_paused_until.map(|value| value.timestamp()),
            Some(until.timestamp())
        );

        let cleared = repo
            .set_ai_paused_until(&conversation.id, &conversation.organization_id, None)
            .await
            .expect("clear pause")
            .expect("conversation should be found");
        assert_eq!(cleared.ai_paused_until, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn set_ai_paused_until_is_tenant_scoped() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = conversation("C-TENANT-1", "org-1");
        repo.save(conversation.clone()).await.expect("save conversation");

        let wrong_org = OrganizationId("org-2".to_string());
        let updated = repo
            .set_ai_paused_until(&conversation.id, &wrong_org, Some(Utc::now()))
            .await
            .expect("update should not error");
        assert_eq!(updated, None);

        let untouched = repo
            .find_by_id(&conversation.id)
            .await
            .expect("find conversation")
            .expect("row exists");
        assert_eq!(untouched.ai_paused_until, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn update_ai_cursor_persists_both_columns() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = conversation("C-CURSOR-1", "org-1");
        repo.save(conversation.clone()).await.expect("save conversation");

        let cursor = AiCursor {
            message_id: MessageId("M-3".to_string()),
            message_created_at: parse_ts("2026-08-01T12:10:00Z"),
        };
        repo.update_ai_cursor(&conversation.id, &conversation.organization_id, cursor.clone())
            .await
            .expect("update cursor");

        let found = repo
            .find_by_id(&conversation.id)
            .await
            .expect("find conversation")
            .expect("row exists");
        assert_eq!(found.ai_cursor, Some(cursor));

        pool.close().await;
    }
}
