//! Named queues, the handler registry and worker lifecycles.

use crate::config::{QueueConfig, QueueDriver, WorkerConfig};
use crate::error::{QueueError, QueueResult};
use crate::handler::{HandlerFactory, JobHandler};
use crate::job::{Job, Payload};
use crate::queue::{MemoryQueue, Queue, RedisQueue};
use crate::registry::JobRegistry;
use crate::worker::{Worker, WorkerStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Queues {
    by_name: HashMap<String, Arc<dyn Queue>>,
    default: Option<String>,
}

#[derive(Default)]
struct Workers {
    running: HashMap<String, Worker>,
    /// Queues whose worker is stopping; the sender closes when the drain ends
    draining: HashMap<String, watch::Receiver<()>>,
}

/// Entry point for producers and for process lifecycle management.
///
/// Holds every named queue, the shared handler registry and at most one
/// running [`Worker`] per queue name.
///
/// # Examples
///
/// ```no_run
/// use golara_queue::{Job, MemoryQueue, QueueManager};
/// use std::sync::Arc;
///
/// # async fn example() -> golara_queue::QueueResult<()> {
/// let manager = QueueManager::new();
/// manager.add_queue("emails", Arc::new(MemoryQueue::new("emails")));
///
/// manager.register_fn("send_welcome", |payload| async move {
///     println!("Welcome, {:?}", payload.get("to"));
///     Ok(())
/// });
///
/// manager
///     .dispatch(Job::new("send_welcome").with("to", "user@example.com"), None)
///     .await?;
///
/// manager.start_worker("emails", 4).await?;
/// // ...
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct QueueManager {
    queues: RwLock<Queues>,
    workers: Mutex<Workers>,
    registry: JobRegistry,
    worker_config: WorkerConfig,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    /// Create a manager with no queues and default worker tuning.
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(Queues::default()),
            workers: Mutex::new(Workers::default()),
            registry: JobRegistry::new(),
            worker_config: WorkerConfig::default(),
        }
    }

    /// Use `config` for backoffs and pop bounds of workers started later.
    pub fn with_worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Bootstrap from configuration.
    ///
    /// A memory queue is always registered under the configured name. With the
    /// `redis` driver it is replaced by a Redis queue when the server answers;
    /// otherwise the memory queue stays and the fallback is logged.
    pub async fn from_config(config: &QueueConfig) -> Self {
        let manager = Self::new().with_worker_config(config.worker.clone());
        let name = config.queue_name.clone();

        manager.add_queue(name.clone(), Arc::new(MemoryQueue::new(name.clone())));

        if config.driver == QueueDriver::Redis {
            match connect_redis(config).await {
                Ok(queue) => {
                    manager.add_queue(name.clone(), Arc::new(queue));
                    info!(queue = %name, "Using Redis queue driver");
                }
                Err(e) => {
                    warn!(
                        queue = %name,
                        error = %e,
                        "Redis unavailable, falling back to memory queue"
                    );
                }
            }
        }

        manager
    }

    /// Register a queue; the first queue added becomes the default.
    ///
    /// Adding a name that already exists replaces the queue instance. A worker
    /// already running keeps polling the instance it was started with.
    pub fn add_queue(&self, name: impl Into<String>, queue: Arc<dyn Queue>) {
        let name = name.into();
        let mut queues = self.queues.write();

        if queues.default.is_none() {
            queues.default = Some(name.clone());
        }
        if queues.by_name.insert(name.clone(), queue).is_some() {
            debug!(queue = %name, "Replaced queue");
        }
    }

    /// Resolve a queue by name, or the default queue when `name` is `None`.
    pub fn queue(&self, name: Option<&str>) -> QueueResult<Arc<dyn Queue>> {
        let queues = self.queues.read();
        let name = match name {
            Some(name) => name,
            None => queues.default.as_deref().ok_or(QueueError::NoDefaultQueue)?,
        };

        queues
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    /// Names of all registered queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a handler factory for a job name (last registration wins).
    pub fn register_job(&self, name: impl Into<String>, factory: HandlerFactory) {
        self.registry.register(name, factory);
    }

    /// Register a handler type constructed with `Default`.
    pub fn register_handler<H>(&self, name: impl Into<String>)
    where
        H: JobHandler + Default,
    {
        self.registry.register_handler::<H>(name);
    }

    /// Register an async closure as the handler for a job name.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        self.registry.register_fn(name, func);
    }

    /// The shared handler registry.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Enqueue a job for immediate processing.
    pub async fn dispatch(&self, job: Job, queue: Option<&str>) -> QueueResult<()> {
        let target = self.queue(queue)?;
        target.push(&job, None).await?;
        debug!(queue = %target.name(), job = %job.name, job_id = %job.id, "Dispatched job");
        Ok(())
    }

    /// Enqueue a job that becomes available after `delay`.
    pub async fn dispatch_later(
        &self,
        job: Job,
        delay: Duration,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let target = self.queue(queue)?;
        target.push(&job, Some(delay)).await?;
        debug!(
            queue = %target.name(),
            job = %job.name,
            job_id = %job.id,
            delay_ms = delay.as_millis() as u64,
            "Dispatched delayed job"
        );
        Ok(())
    }

    /// Start a pool of `concurrency` pollers on the named queue.
    ///
    /// Starting a queue that already has a running worker does nothing. If the
    /// previous worker for that queue is still draining, this waits for the
    /// drain to finish before starting the new pool.
    pub async fn start_worker(&self, name: &str, concurrency: usize) -> QueueResult<()> {
        let queue = self.queue(Some(name))?;

        loop {
            let mut workers = self.workers.lock().await;

            if workers.running.contains_key(name) {
                debug!(queue = %name, "Worker already running, ignoring start");
                return Ok(());
            }

            // A closed channel means the stopping call went away mid-drain
            let draining = workers
                .draining
                .get(name)
                .filter(|drained| drained.has_changed().is_ok())
                .cloned();
            if let Some(mut drained) = draining {
                drop(workers);
                debug!(queue = %name, "Waiting for previous worker to drain");
                let _ = drained.changed().await;
                continue;
            }
            workers.draining.remove(name);

            let config = self.worker_config.clone().with_concurrency(concurrency);
            let mut worker = Worker::new(queue, self.registry.clone(), config);
            worker.start()?;
            workers.running.insert(name.to_string(), worker);

            return Ok(());
        }
    }

    /// Stop the named worker, waiting for in-flight jobs to finish.
    ///
    /// The queue stays reserved until the drain completes, so no second pool
    /// can start on it meanwhile. Returns `false` when no worker was running
    /// for that queue; a call racing another stop still waits for that drain.
    pub async fn stop_worker(&self, name: &str) -> bool {
        let (mut worker, done) = {
            let mut workers = self.workers.lock().await;
            match workers.running.remove(name) {
                Some(worker) => {
                    let (done, drained) = watch::channel(());
                    workers.draining.insert(name.to_string(), drained);
                    (worker, done)
                }
                None => {
                    let draining = workers.draining.get(name).cloned();
                    drop(workers);
                    if let Some(mut drained) = draining {
                        let _ = drained.changed().await;
                    }
                    debug!(queue = %name, "No worker running, ignoring stop");
                    return false;
                }
            }
        };

        worker.stop().await;

        self.workers.lock().await.draining.remove(name);
        drop(done);
        true
    }

    /// Stop every worker concurrently and wait for all of them to drain.
    pub async fn shutdown(&self) {
        let (workers, done) = {
            let mut workers = self.workers.lock().await;
            let running: Vec<(String, Worker)> = workers.running.drain().collect();
            let (done, drained) = watch::channel(());
            for (name, _) in &running {
                workers.draining.insert(name.clone(), drained.clone());
            }
            (running, done)
        };
        if workers.is_empty() {
            return;
        }

        info!(workers = workers.len(), "Shutting down queue workers");
        let names: Vec<String> = workers.iter().map(|(name, _)| name.clone()).collect();
        let mut tasks = JoinSet::new();
        for (_, mut worker) in workers {
            tasks.spawn(async move { worker.stop().await });
        }
        while tasks.join_next().await.is_some() {}

        let mut workers = self.workers.lock().await;
        for name in &names {
            workers.draining.remove(name);
        }
        drop(done);
    }

    /// Whether a worker is running for the named queue.
    pub async fn is_running(&self, name: &str) -> bool {
        self.workers
            .lock()
            .await
            .running
            .get(name)
            .is_some_and(|w| w.is_running())
    }

    /// Counters of the named queue's worker.
    pub async fn worker_stats(&self, name: &str) -> Option<WorkerStats> {
        self.workers.lock().await.running.get(name).map(|w| w.stats())
    }

    /// Names of queues with a running worker, sorted.
    pub async fn running_workers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.lock().await.running.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Upper bound on the bootstrap connection attempt.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

async fn connect_redis(config: &QueueConfig) -> QueueResult<RedisQueue> {
    let connect = async {
        let queue = RedisQueue::connect(config).await?;
        queue.ping().await?;
        Ok(queue)
    };

    tokio::time::timeout(REDIS_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| QueueError::Store("timed out connecting to Redis".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    fn manager() -> QueueManager {
        QueueManager::new().with_worker_config(
            WorkerConfig::default()
                .with_idle_backoff(Duration::from_millis(10))
                .with_error_backoff(Duration::from_millis(10)),
        )
    }

    async fn wait_until_empty(queue: &Arc<dyn Queue>) {
        for _ in 0..300 {
            if queue.size().await.unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue was not drained");
    }

    #[test]
    fn test_first_queue_is_default() {
        let manager = QueueManager::new();
        manager.add_queue("emails", Arc::new(MemoryQueue::new("emails")));
        manager.add_queue("reports", Arc::new(MemoryQueue::new("reports")));

        assert_eq!(manager.queue(None).unwrap().name(), "emails");
        assert_eq!(manager.queue(Some("reports")).unwrap().name(), "reports");
        assert_eq!(manager.queue_names(), vec!["emails", "reports"]);
    }

    #[test]
    fn test_unknown_queue_is_an_error() {
        let manager = QueueManager::new();
        assert!(matches!(manager.queue(None), Err(QueueError::NoDefaultQueue)));

        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));
        assert!(matches!(
            manager.queue(Some("missing")),
            Err(QueueError::UnknownQueue(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_dispatch_to_named_and_default_queue() {
        let manager = QueueManager::new();
        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));
        manager.add_queue("emails", Arc::new(MemoryQueue::new("emails")));

        manager.dispatch(Job::new("a"), None).await.unwrap();
        manager.dispatch(Job::new("b"), Some("emails")).await.unwrap();
        manager
            .dispatch_later(Job::new("c"), Duration::from_secs(1), Some("emails"))
            .await
            .unwrap();

        assert_eq!(manager.queue(None).unwrap().size().await.unwrap(), 1);
        assert_eq!(manager.queue(Some("emails")).unwrap().size().await.unwrap(), 2);

        let err = manager.dispatch(Job::new("d"), Some("nope")).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_register_job_last_write_wins() {
        let manager = manager();
        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));
        let hits = Arc::new(SyncMutex::new(Vec::new()));

        let first = hits.clone();
        manager.register_fn("job", move |_| {
            let first = first.clone();
            async move {
                first.lock().push("first");
                Ok(())
            }
        });
        let second = hits.clone();
        manager.register_fn("job", move |_| {
            let second = second.clone();
            async move {
                second.lock().push("second");
                Ok(())
            }
        });
        assert_eq!(manager.registry().len(), 1);

        manager.dispatch(Job::new("job"), None).await.unwrap();
        manager.start_worker("default", 1).await.unwrap();
        wait_until_empty(&manager.queue(None).unwrap()).await;
        manager.stop_worker("default").await;

        assert_eq!(*hits.lock(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_start_worker_is_idempotent() {
        let manager = manager();
        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));

        manager.start_worker("default", 2).await.unwrap();
        manager.start_worker("default", 5).await.unwrap();

        assert!(manager.is_running("default").await);
        assert_eq!(manager.running_workers().await, vec!["default"]);

        assert!(manager.stop_worker("default").await);
        assert!(!manager.is_running("default").await);
        assert!(!manager.stop_worker("default").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_during_drain_keeps_single_pool() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let manager = Arc::new(manager());
        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let (a, p, d) = (active.clone(), peak.clone(), done.clone());
        manager.register_fn("slow", move |_| {
            let (a, p, d) = (a.clone(), p.clone(), d.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(300)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        manager.dispatch(Job::new("slow"), None).await.unwrap();
        manager.dispatch(Job::new("slow"), None).await.unwrap();
        manager.start_worker("default", 1).await.unwrap();
        while active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stopping = manager.clone();
        let stop = tokio::spawn(async move { stopping.stop_worker("default").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.start_worker("default", 1).await.unwrap();
        // The restart only returns once the old pool has drained
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(stop.await.unwrap());
        assert!(manager.is_running("default").await);

        for _ in 0..300 {
            if done.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        manager.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_worker_unknown_queue() {
        let manager = manager();
        let err = manager.start_worker("missing", 1).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownQueue(_)));
        assert!(manager.running_workers().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_creates_one_pool() {
        let manager = Arc::new(manager());
        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let manager = manager.clone();
            tasks.spawn(async move { manager.start_worker("default", 2).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(manager.running_workers().await.len(), 1);
        manager.shutdown().await;
        assert!(manager.running_workers().await.is_empty());
    }

    #[tokio::test]
    async fn test_worker_stats_track_outcomes() {
        let manager = manager();
        manager.add_queue("default", Arc::new(MemoryQueue::new("default")));
        manager.register_fn("ok", |_| async { Ok(()) });

        manager.dispatch(Job::new("ok"), None).await.unwrap();
        manager.dispatch(Job::new("unregistered"), None).await.unwrap();
        manager.start_worker("default", 1).await.unwrap();
        wait_until_empty(&manager.queue(None).unwrap()).await;

        for _ in 0..100 {
            let stats = manager.worker_stats("default").await.unwrap();
            if stats.processed == 2 && stats.completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = manager.worker_stats("default").await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.dropped, 1);

        manager.shutdown().await;
        assert!(manager.worker_stats("default").await.is_none());
    }

    #[tokio::test]
    async fn test_from_config_memory_driver() {
        let config = QueueConfig::builder().queue_name("jobs").build();
        let manager = QueueManager::from_config(&config).await;

        assert_eq!(manager.queue(None).unwrap().name(), "jobs");
        assert_eq!(manager.queue_names(), vec!["jobs"]);
    }

    #[tokio::test]
    async fn test_from_config_falls_back_when_redis_unreachable() {
        let config = QueueConfig::builder()
            .driver(QueueDriver::Redis)
            .redis_host("127.0.0.1")
            .redis_port(1)
            .build();
        let manager = QueueManager::from_config(&config).await;

        // The memory queue accepts jobs even though Redis is down
        manager.dispatch(Job::new("ping"), None).await.unwrap();
        assert_eq!(manager.queue(None).unwrap().size().await.unwrap(), 1);
    }
}
