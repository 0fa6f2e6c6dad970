pub mod coalesce;
pub mod config;
pub mod domain;
pub mod failure;

pub use coalesce::{coalesce, CoalescedBatch};
pub use domain::conversation::{AiCursor, Conversation, ConversationId, OrganizationId};
pub use domain::message::{AuthorKind, MessageId, TriggerMessage};
pub use failure::{resolve, RetryVerdict};
