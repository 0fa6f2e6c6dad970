//! Sliding outbound-message window, the rogue-behavior detector.
//!
//! Each conversation gets a time-scored set of recently sent automated
//! message ids under `outbound-window:<conversation id>`. Entries older than
//! the lookback are purged on every record, so the cardinality always
//! reflects the window, never unbounded history. The key's TTL is twice the
//! lookback so idle conversations self-clean.

use std::sync::Arc;

use chrono::{Duration, Utc};

use parley_core::domain::conversation::ConversationId;
use parley_core::domain::message::MessageId;

use crate::store::{EphemeralStore, StoreError};

pub struct OutboundRateWindow {
    store: Arc<dyn EphemeralStore>,
    lookback_secs: u64,
}

impl OutboundRateWindow {
    pub fn new(store: Arc<dyn EphemeralStore>, lookback_secs: u64) -> Self {
        Self { store, lookback_secs }
    }

    pub fn key(conversation_id: &ConversationId) -> String {
        format!("outbound-window:{}", conversation_id.0)
    }

    /// Record one outbound automated message and return how many fall inside
    /// the lookback window. Recording the same message id twice is a no-op.
    pub async fn record(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<u64, StoreError> {
        let lookback = Duration::seconds(self.lookback_secs as i64);
        self.store
            .window_record(
                &Self::key(conversation_id),
                &message_id.0,
                Utc::now(),
                lookback,
                lookback * 2,
            )
            .await
    }

    /// Drop the conversation's window entirely. Invoked when a pause begins,
    /// so a resumed agent starts with a clean slate.
    pub async fn reset(&self, conversation_id: &ConversationId) -> Result<(), StoreError> {
        self.store.delete(&Self::key(conversation_id)).await
    }
}
