//! Durable queue on a list plus a score-ordered set of delayed jobs.

use super::{Queue, effective_delay};
use crate::config::{QueueConfig, WorkerConfig};
use crate::error::QueueResult;
use crate::job::Job;
use crate::redis_store::RedisStore;
use crate::store::QueueStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Durable job queue.
///
/// Keys for a queue named `Q`:
/// - `Q` - list of ready jobs (pushed at the head, popped from the tail)
/// - `Q:delayed` - sorted set of delayed jobs scored by the unix time (in
///   seconds, millisecond precision) at which they become ready
///
/// Due delayed jobs are promoted by an atomic store operation at the start of
/// every `pop`, so concurrent pollers never promote the same job twice.
#[derive(Clone)]
pub struct RedisQueue {
    store: Arc<dyn QueueStore>,
    name: String,
    pending_key: String,
    delayed_key: String,
    poll_timeout: Duration,
    promote_batch: usize,
}

impl RedisQueue {
    /// Connect to Redis using the queue configuration.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let store = RedisStore::connect(&config.redis.connection_url()).await?;
        info!(queue = %config.queue_name, "Redis queue ready");
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Build a queue over any backing store.
    pub fn with_store(store: Arc<dyn QueueStore>, config: &QueueConfig) -> Self {
        let pending_key = config.pending_key();
        Self {
            store,
            name: config.queue_name.clone(),
            delayed_key: format!("{}:delayed", pending_key),
            pending_key,
            poll_timeout: config.worker.poll_timeout,
            promote_batch: config.worker.promote_batch,
        }
    }

    /// Build a queue named `name` over `store` with default tuning.
    pub fn new(store: Arc<dyn QueueStore>, name: impl Into<String>) -> Self {
        let config = QueueConfig::builder().queue_name(name).build();
        Self::with_store(store, &config)
    }

    /// Override how long a pop waits for a job.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Apply the pop bound and sweep size from worker tuning.
    pub fn with_worker_config(mut self, worker: &WorkerConfig) -> Self {
        self.poll_timeout = worker.poll_timeout;
        self.promote_batch = worker.promote_batch;
        self
    }

    /// Key of the ready list.
    pub fn pending_key(&self) -> &str {
        &self.pending_key
    }

    /// Key of the delayed set.
    pub fn delayed_key(&self) -> &str {
        &self.delayed_key
    }

    /// Number of jobs still waiting for their delay to elapse.
    pub async fn delayed_size(&self) -> QueueResult<u64> {
        self.store.scheduled_len(&self.delayed_key).await
    }

    /// Check the backing store is reachable.
    pub async fn ping(&self) -> QueueResult<()> {
        self.store.ping().await
    }

    /// Move every due delayed job to the ready list.
    async fn promote_due(&self) -> QueueResult<()> {
        let batch = self.promote_batch.max(1);
        loop {
            let moved = self
                .store
                .promote_due(&self.delayed_key, &self.pending_key, now_secs(), batch)
                .await?;

            if moved > 0 {
                debug!(queue = %self.name, moved, "Promoted delayed jobs");
            }
            if (moved as usize) < batch {
                return Ok(());
            }
        }
    }
}

/// Current unix time in seconds with millisecond precision.
fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[async_trait]
impl Queue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, job: &Job, delay: Option<Duration>) -> QueueResult<()> {
        let data = job.to_json()?;

        match effective_delay(delay) {
            Some(delay) => {
                let ready_at = now_secs() + delay.as_secs_f64();
                self.store.schedule(&self.delayed_key, &data, ready_at).await
            }
            None => self.store.push(&self.pending_key, &data).await,
        }
    }

    async fn pop(&self) -> QueueResult<Option<Job>> {
        self.promote_due().await?;

        match self.store.pop(&self.pending_key, self.poll_timeout).await? {
            Some(data) => Ok(Some(Job::from_json(&data)?)),
            None => Ok(None),
        }
    }

    async fn size(&self) -> QueueResult<u64> {
        self.store.len(&self.pending_key).await
    }

    async fn clear(&self) -> QueueResult<()> {
        self.store
            .delete(&[self.pending_key.as_str(), self.delayed_key.as_str()])
            .await
    }
}
