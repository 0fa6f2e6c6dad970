//! Batch coalescing for queued trigger jobs.
//!
//! A visitor typing several quick messages in a row should produce one agent
//! run addressing the latest context, not one run per message. Coalescing
//! collapses a contiguous leading run of visitor triggers into a single
//! effective job and reports which raw jobs were absorbed so the queue can
//! acknowledge them without separate processing.

use std::collections::HashMap;

use crate::domain::message::{MessageId, TriggerMessage};

/// Result of collapsing a conversation's pending trigger jobs.
///
/// `coalesced_message_ids` is a non-empty contiguous prefix of the input
/// ordering, starting at the head. `effective_message` is always the last
/// element of that prefix: the latest message survives, earlier visitor blips
/// are folded in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoalescedBatch {
    pub effective_message: TriggerMessage,
    pub coalesced_message_ids: Vec<MessageId>,
}

/// Collapse the head message plus any contiguous run of visitor triggers
/// behind it into one batch.
///
/// A member-authored head is never merged with later messages: each member
/// message may carry independent intent requiring its own run. The scan over
/// `ordered_ids` stops at the first message that is missing from `metadata`,
/// not triggerable, or not visitor-authored; it never skips a gap.
pub fn coalesce(
    head: &TriggerMessage,
    ordered_ids: &[MessageId],
    metadata: &HashMap<MessageId, TriggerMessage>,
) -> CoalescedBatch {
    let mut batch = CoalescedBatch {
        effective_message: head.clone(),
        coalesced_message_ids: vec![head.id.clone()],
    };

    if !head.is_visitor_trigger() {
        return batch;
    }

    for id in ordered_ids {
        let Some(message) = metadata.get(id) else {
            break;
        };
        if !message.is_triggerable() || !message.is_visitor_trigger() {
            break;
        }
        batch.coalesced_message_ids.push(id.clone());
        batch.effective_message = message.clone();
    }

    batch
}
