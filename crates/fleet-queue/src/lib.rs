//! Three-priority deduplicated work queue with a failure-counter /
//! backoff circuit breaker (§4.4).

mod error;
mod keys;
mod queue;

pub use error::QueueError;
pub use queue::{EnqueueOutcome, WorkQueue, WorkQueueSettings};
