//! Boundary contract with the generation pipeline.
//!
//! Prompt construction, tool calling and streaming output live elsewhere;
//! this core only needs to hand the pipeline an effective trigger message and
//! learn whether a reply went out, and if not whether the failure class is
//! worth retrying.

use async_trait::async_trait;
use thiserror::Error;

use parley_core::domain::conversation::Conversation;
use parley_core::domain::message::{MessageId, TriggerMessage};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("generation failed: {message}")]
pub struct GenerationError {
    pub message: String,
    pub retryable: bool,
}

impl GenerationError {
    /// Transient upstream trouble: timeouts, rate limits, 5xx responses.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// Malformed input or permanent upstream rejection.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub message_id: MessageId,
}

#[async_trait]
pub trait ReplyPipeline: Send + Sync {
    async fn generate(
        &self,
        conversation: &Conversation,
        effective_message: &TriggerMessage,
    ) -> Result<OutboundReply, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::GenerationError;

    #[test]
    fn constructors_set_the_failure_class() {
        let transient = GenerationError::retryable("upstream timeout");
        assert!(transient.retryable);
        assert_eq!(transient.to_string(), "generation failed: upstream timeout");

        let permanent = GenerationError::permanent("prompt too large");
        assert!(!permanent.retryable);
    }
}
