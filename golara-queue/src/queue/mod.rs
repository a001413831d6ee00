//! Queue abstraction and its implementations.

mod memory;
mod redis;

pub use memory::MemoryQueue;
pub use redis::RedisQueue;

use crate::error::QueueResult;
use crate::job::Job;
use async_trait::async_trait;
use std::time::Duration;

/// A named FIFO of jobs with optional delayed availability.
///
/// Jobs pushed without a delay come out of [`pop`](Queue::pop) in push order.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Name of the queue.
    fn name(&self) -> &str;

    /// Enqueue a job, available immediately when `delay` is `None` or zero and
    /// no earlier than `now + delay` otherwise.
    async fn push(&self, job: &Job, delay: Option<Duration>) -> QueueResult<()>;

    /// Take the next ready job.
    ///
    /// Due delayed jobs are promoted first. `Ok(None)` means nothing became
    /// available within the queue's wait bound and the caller should poll
    /// again. `Err(QueueError::Deserialization)` means an entry was taken but
    /// could not be decoded; it is gone from the queue. Any other `Err` is a
    /// transport failure.
    async fn pop(&self) -> QueueResult<Option<Job>>;

    /// Number of jobs ready to be popped.
    async fn size(&self) -> QueueResult<u64>;

    /// Drop every job in the queue.
    async fn clear(&self) -> QueueResult<()>;
}

/// Whether a push should go to the delayed structure.
pub(crate) fn effective_delay(delay: Option<Duration>) -> Option<Duration> {
    delay.filter(|d| !d.is_zero())
}
