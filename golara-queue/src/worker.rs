//! Worker pools that poll a queue and execute jobs.

use crate::config::WorkerConfig;
use crate::error::{QueueError, QueueResult};
use crate::handler::HandlerFactory;
use crate::job::Job;
use crate::queue::Queue;
use crate::registry::JobRegistry;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Lifecycle of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, no pollers spawned yet
    Idle,
    /// Pollers are consuming jobs
    Running,
    /// Stop requested, waiting for in-flight jobs
    Stopping,
    /// All pollers have exited
    Stopped,
}

/// Snapshot of a worker's job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs taken off the queue
    pub processed: u64,
    /// Jobs whose handler returned `Ok`
    pub completed: u64,
    /// Jobs whose handler returned an error
    pub failed: u64,
    /// Jobs whose handler panicked
    pub panicked: u64,
    /// Jobs dropped because no handler was registered or the envelope was malformed
    pub dropped: u64,
    /// Pops that failed with a transport error
    pub pop_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
    pop_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pop_errors: self.pop_errors.load(Ordering::Relaxed),
        }
    }
}

/// A pool of pollers bound to one queue.
///
/// Each poller loops independently: pop a job, look up its handler, run it.
/// Pollers share only the queue and the registry. Stopping is cooperative: the
/// stop signal is checked between jobs, and a handler that is already running
/// is always allowed to finish.
pub struct Worker {
    queue: Arc<dyn Queue>,
    registry: JobRegistry,
    config: WorkerConfig,
    state: WorkerState,
    counters: Arc<Counters>,
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Create an idle worker.
    pub fn new(queue: Arc<dyn Queue>, registry: JobRegistry, config: WorkerConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queue,
            registry,
            config,
            state: WorkerState::Idle,
            counters: Arc::new(Counters::default()),
            stop_tx,
            handles: Vec::new(),
        }
    }

    /// Spawn `concurrency` pollers.
    pub fn start(&mut self) -> QueueResult<()> {
        if self.state != WorkerState::Idle {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        if self.config.concurrency == 0 {
            return Err(QueueError::Config(
                "worker concurrency must be at least 1".to_string(),
            ));
        }

        for id in 0..self.config.concurrency {
            let poller = Poller {
                queue: self.queue.clone(),
                registry: self.registry.clone(),
                counters: self.counters.clone(),
                idle_backoff: self.config.idle_backoff,
                error_backoff: self.config.error_backoff,
            };
            let span = info_span!("poller", queue = %self.queue.name(), poller = id);
            let stop = self.stop_tx.subscribe();

            self.handles
                .push(tokio::spawn(poller.run(stop).instrument(span)));
        }

        self.state = WorkerState::Running;
        info!(
            queue = %self.queue.name(),
            concurrency = self.config.concurrency,
            "Worker started"
        );
        Ok(())
    }

    /// Signal every poller to stop and wait for their current jobs to finish.
    pub async fn stop(&mut self) {
        match self.state {
            WorkerState::Stopped => return,
            WorkerState::Idle => {
                self.state = WorkerState::Stopped;
                return;
            }
            WorkerState::Running | WorkerState::Stopping => {}
        }

        self.state = WorkerState::Stopping;
        info!(queue = %self.queue.name(), "Stopping worker, draining in-flight jobs");
        self.stop_tx.send_replace(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(queue = %self.queue.name(), error = %e, "Poller task ended abnormally");
            }
        }

        self.state = WorkerState::Stopped;
        info!(queue = %self.queue.name(), "Worker stopped");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Whether pollers are consuming jobs.
    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    /// Number of pollers.
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Name of the queue this worker consumes.
    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Job counters so far.
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Pollers exit on their own once they see the signal
        self.stop_tx.send_replace(true);
    }
}

struct Poller {
    queue: Arc<dyn Queue>,
    registry: JobRegistry,
    counters: Arc<Counters>,
    idle_backoff: Duration,
    error_backoff: Duration,
}

impl Poller {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        debug!("Poller started");

        loop {
            if *stop.borrow() {
                break;
            }

            // A pop is never abandoned halfway: a job already taken from the
            // store must reach a handler.
            match self.queue.pop().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    if pause(&mut stop, self.idle_backoff).await {
                        break;
                    }
                }
                Err(e @ QueueError::Deserialization(_)) => {
                    // The entry already left the store
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Dropping malformed job envelope");
                }
                Err(e) => {
                    self.counters.pop_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Error popping job");
                    if pause(&mut stop, self.error_backoff).await {
                        break;
                    }
                }
            }
        }

        debug!("Poller stopped");
    }

    async fn process(&self, job: Job) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        let Some(factory) = self.registry.factory(&job.name) else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(job = %job.name, job_id = %job.id, "No handler registered, dropping job");
            return;
        };

        let name = job.name.clone();
        let id = job.id;
        debug!(job = %name, job_id = %id, "Processing job");

        match execute(factory, job).await {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(job = %name, job_id = %id, "Job completed");
            }
            Err(e @ QueueError::Panicked { .. }) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(job = %name, job_id = %id, error = %e, "Job panicked");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = %name, job_id = %id, error = %e, "Job failed");
            }
        }
    }
}

/// Sleep for `duration` unless a stop is signalled first.
///
/// Returns `true` when the poller should exit.
async fn pause(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let closed = tokio::select! {
        changed = stop.changed() => changed.is_err(),
        _ = tokio::time::sleep(duration) => false,
    };
    closed || *stop.borrow()
}

/// Build a handler, inject the payload and run it.
///
/// The handler runs in its own task so a panic anywhere in construction or
/// execution is contained here and reported as [`QueueError::Panicked`].
async fn execute(factory: HandlerFactory, job: Job) -> QueueResult<()> {
    let name = job.name.clone();
    let task = tokio::spawn(async move {
        let mut handler = factory();
        handler.set_payload(job.payload);
        handler.handle().await
    });

    match task.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(QueueError::Panicked {
            job: name,
            message: panic_message(err.into_panic()),
        }),
        Err(err) => Err(QueueError::ExecutionFailed(err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, RedisQueue};
    use crate::store::{InMemoryStore, QueueStore};
    use parking_lot::Mutex;

    fn fast_config(concurrency: usize) -> WorkerConfig {
        WorkerConfig::default()
            .with_concurrency(concurrency)
            .with_idle_backoff(Duration::from_millis(10))
            .with_error_backoff(Duration::from_millis(10))
    }

    async fn wait_for(worker: &Worker, done: impl Fn(&WorkerStats) -> bool) {
        for _ in 0..300 {
            if done(&worker.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not reach expected state: {:?}", worker.stats());
    }

    #[test]
    fn test_worker_config() {
        let config = fast_config(4);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.idle_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42)), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let queue = Arc::new(MemoryQueue::new("default"));
        let mut worker = Worker::new(queue, JobRegistry::new(), fast_config(2));
        assert_eq!(worker.state(), WorkerState::Idle);

        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(matches!(worker.start(), Err(QueueError::WorkerAlreadyRunning)));

        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);

        // Stopping twice is harmless
        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let queue = Arc::new(MemoryQueue::new("default"));
        let mut worker = Worker::new(queue, JobRegistry::new(), fast_config(0));

        assert!(matches!(worker.start(), Err(QueueError::Config(_))));
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_executes_jobs_in_order_with_payload() {
        let queue = Arc::new(MemoryQueue::new("default"));
        let registry = JobRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        registry.register_fn("record", move |payload| {
            let sink = sink.clone();
            async move {
                sink.lock().push(payload["n"].as_i64().unwrap_or(-1));
                Ok(())
            }
        });

        for n in 0..5 {
            queue.push(&Job::new("record").with("n", n), None).await.unwrap();
        }

        let mut worker = Worker::new(queue, registry, fast_config(1));
        worker.start().unwrap();
        wait_for(&worker, |s| s.completed == 5).await;
        worker.stop().await;

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_and_unhandled_jobs_are_counted() {
        let queue = Arc::new(MemoryQueue::new("default"));
        let registry = JobRegistry::new();
        registry.register_fn("fails", |_| async {
            Err(QueueError::ExecutionFailed("nope".to_string()))
        });

        queue.push(&Job::new("fails"), None).await.unwrap();
        queue.push(&Job::new("unknown"), None).await.unwrap();

        let mut worker = Worker::new(queue.clone(), registry, fast_config(1));
        worker.start().unwrap();
        wait_for(&worker, |s| s.processed == 2).await;
        worker.stop().await;

        let stats = worker.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.completed, 0);
        // Failed jobs are not requeued
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_dropped_without_backoff() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(
            RedisQueue::new(store.clone(), "default").with_poll_timeout(Duration::from_millis(20)),
        );
        let registry = JobRegistry::new();
        registry.register_fn("fine", |_| async { Ok(()) });

        store.push("default", "{not json").await.unwrap();
        queue.push(&Job::new("fine"), None).await.unwrap();

        // An error backoff would outlast the wait below
        let config = fast_config(1).with_error_backoff(Duration::from_secs(30));
        let mut worker = Worker::new(queue, registry, config);
        worker.start().unwrap();
        wait_for(&worker, |s| s.completed == 1).await;
        worker.stop().await;

        let stats = worker.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pop_errors, 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let queue = Arc::new(MemoryQueue::new("default"));
        let registry = JobRegistry::new();
        registry.register_fn("explode", |payload| async move {
            if payload.is_empty() {
                panic!("kaboom");
            }
            Ok(())
        });
        registry.register_fn("fine", |_| async { Ok(()) });

        queue.push(&Job::new("explode"), None).await.unwrap();
        queue.push(&Job::new("fine"), None).await.unwrap();

        let mut worker = Worker::new(queue, registry, fast_config(1));
        worker.start().unwrap();
        wait_for(&worker, |s| s.processed == 2).await;
        worker.stop().await;

        let stats = worker.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_handler() {
        let queue = Arc::new(MemoryQueue::new("default"));
        let registry = JobRegistry::new();
        let finished = Arc::new(Mutex::new(false));

        let flag = finished.clone();
        registry.register_fn("slow", move |_| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                *flag.lock() = true;
                Ok(())
            }
        });
        queue.push(&Job::new("slow"), None).await.unwrap();

        let mut worker = Worker::new(queue, registry, fast_config(1));
        worker.start().unwrap();
        wait_for(&worker, |s| s.processed == 1).await;

        worker.stop().await;

        assert!(*finished.lock());
        assert_eq!(worker.stats().completed, 1);
    }
}
