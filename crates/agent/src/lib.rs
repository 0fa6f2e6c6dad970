//! Reply Guard - orchestration core for automated agent replies
//!
//! This crate decides, for a stream of inbound conversation messages,
//! whether, when, and with what input the agent is triggered to reply,
//! while guaranteeing no duplicate or runaway automated replies:
//!
//! 1. **Coalescing** (`parley_core::coalesce`) - collapse a burst of queued
//!    visitor messages into one effective trigger job
//! 2. **Pause arbitration** (`pause`) - cached-then-durable pause lookups,
//!    extend-only pauses, rogue auto-pause
//! 3. **Rate detection** (`window`) - sliding outbound-message window over
//!    the shared ephemeral store
//! 4. **Failure resolution** (`parley_core::failure`) - bounded retries for
//!    generation failures
//!
//! # Key Types
//!
//! - `PauseController` - single source of truth for "may the agent act on
//!   this conversation right now" (see `pause` module)
//! - `ReplyWorker` - the job-processing loop gluing the pieces together
//! - `EphemeralStore` - pluggable TTL key-value store shared across workers
//!
//! # Safety Principle
//!
//! Cache entries are advisory, never authoritative. Every pause check has a
//! durable fallback path, so a cache entry lost to eviction or crash can
//! never cause an incorrect "not paused" determination.

pub mod pause;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod window;
pub mod worker;

pub use pause::{PauseController, PauseError, RogueCheck, AUTO_PAUSE_REASON};
pub use pipeline::{GenerationError, OutboundReply, ReplyPipeline};
pub use queue::{InMemoryTriggerQueue, QueueAdmin, QueueError, TriggerJob, TriggerQueue};
pub use store::{EphemeralStore, InMemoryStore, StoreError};
pub use window::OutboundRateWindow;
pub use worker::{JobOutcome, ReplyWorker, WorkerError};
