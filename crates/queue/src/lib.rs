//! The Pulsebridge action queue.
//!
//! A priority-ordered, rate-limited, retrying dispatcher. Items are
//! accepted via [`ActionQueue::enqueue`], dispatched in descending priority
//! order (FIFO on ties) through an injected
//! [`ActionExecutor`](pulsebridge_core::ActionExecutor), retried with
//! exponential backoff, and finally retained in a [`DeadLetterQueue`] for
//! inspection and manual requeue.
//!
//! The dispatch loop runs only while items are pending and stops when the
//! queue drains; the queue owns no connection state.

pub mod dlq;
pub mod queue;
pub mod rate;
pub mod retry;
pub mod stats;

pub use dlq::{DeadLetterEntry, DeadLetterQueue};
pub use queue::ActionQueue;
pub use retry::backoff_delay;
