//! Bounded-retry policy for failed generation attempts.
//!
//! Pure decision logic: the queue layer persists per-job failure counters
//! across attempts and clears them after a successful run; this module only
//! renders the verdict.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryVerdict {
    Retry,
    Drop,
}

/// Decide whether a failed generation attempt should be retried or dropped.
///
/// Non-retryable failures (malformed input, permanent upstream rejection)
/// drop unconditionally. Retryable failures retry while `failure_count` is
/// below `failure_threshold`; a count equal to the threshold drops.
pub fn resolve(retryable: bool, failure_count: u32, failure_threshold: u32) -> RetryVerdict {
    if !retryable {
        return RetryVerdict::Drop;
    }

    if failure_count < failure_threshold {
        RetryVerdict::Retry
    } else {
        RetryVerdict::Drop
    }
}
