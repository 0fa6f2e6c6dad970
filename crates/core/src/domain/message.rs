use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorKind {
    Visitor,
    Member,
    System,
}

impl AuthorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Member => "member",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "visitor" => Some(Self::Visitor),
            "member" => Some(Self::Member),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One inbound message that may cause an agent run. `author` is `None` for
/// authorless entries (imports, connector events) which never trigger a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub id: MessageId,
    pub author: Option<AuthorKind>,
    pub created_at: DateTime<Utc>,
}

impl TriggerMessage {
    /// A message can trigger a run only when a visitor or member authored it.
    pub fn is_triggerable(&self) -> bool {
        matches!(self.author, Some(AuthorKind::Visitor) | Some(AuthorKind::Member))
    }

    /// Visitor triggers are the only messages the coalescer may absorb.
    pub fn is_visitor_trigger(&self) -> bool {
        matches!(self.author, Some(AuthorKind::Visitor))
    }
}
