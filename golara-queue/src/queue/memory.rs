//! Process-local queue for development and unit tests.

use super::{Queue, effective_delay};
use crate::error::QueueResult;
use crate::job::Job;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::warn;

/// In-memory FIFO queue.
///
/// `pop` never waits: it returns `Ok(None)` straight away when the queue is
/// empty and the worker's idle backoff paces the polling. Delays are not
/// supported; a delayed push is enqueued immediately.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    jobs: Mutex<VecDeque<Job>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, job: &Job, delay: Option<Duration>) -> QueueResult<()> {
        if let Some(delay) = effective_delay(delay) {
            warn!(
                queue = %self.name,
                job = %job.name,
                delay_ms = delay.as_millis() as u64,
                "Memory queue does not support delays, enqueueing immediately"
            );
        }
        self.jobs.lock().push_back(job.clone());
        Ok(())
    }

    async fn pop(&self) -> QueueResult<Option<Job>> {
        Ok(self.jobs.lock().pop_front())
    }

    async fn size(&self) -> QueueResult<u64> {
        Ok(self.jobs.lock().len() as u64)
    }

    async fn clear(&self) -> QueueResult<()> {
        self.jobs.lock().clear();
        Ok(())
    }
}
