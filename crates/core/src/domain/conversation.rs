use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::MessageId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationId(pub String);

/// Last message position the agent has incorporated. Advancing the cursor
/// prevents the agent from reprocessing history after a pause is lifted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiCursor {
    pub message_id: MessageId,
    pub message_created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub organization_id: OrganizationId,
    pub ai_paused_until: Option<DateTime<Utc>>,
    pub ai_cursor: Option<AiCursor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_ai_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.ai_paused_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::message::MessageId;

    use super::{AiCursor, Conversation, ConversationId, OrganizationId};

    fn conversation() -> Conversation {
        let now = Utc::now();
        Conversation {
            id: ConversationId("C-1".to_string()),
            organization_id: OrganizationId("org-1".to_string()),
            ai_paused_until: None,
            ai_cursor: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unpaused_conversation_reports_not_paused() {
        assert!(!conversation().is_ai_paused_at(Utc::now()));
    }

    #[test]
    fn future_pause_timestamp_reports_paused() {
        let mut conversation = conversation();
        conversation.ai_paused_until = Some(Utc::now() + Duration::minutes(10));
        assert!(conversation.is_ai_paused_at(Utc::now()));
    }

    #[test]
    fn elapsed_pause_timestamp_reports_not_paused() {
        let mut conversation = conversation();
        conversation.ai_paused_until = Some(Utc::now() - Duration::minutes(1));
        assert!(!conversation.is_ai_paused_at(Utc::now()));
    }

    #[test]
    fn cursor_round_trips_through_serde() {
        let cursor = AiCursor {
            message_id: MessageId("M-9".to_string()),
            message_created_at: Utc::now(),
        };
        let json = serde_json::to_string(&cursor).expect("serialize cursor");
        let parsed: AiCursor = serde_json::from_str(&json).expect("deserialize cursor");
        assert_eq!(parsed, cursor);
    }
}
