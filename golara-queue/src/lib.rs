//! Job queue and background worker pools for Golara.
//!
//! Provides:
//! - Named FIFO queues backed by Redis or process memory
//! - Delayed jobs with atomic promotion
//! - Typed handler registration
//! - Worker pools with graceful drain and panic containment
//!
//! ## Quick Start - Job Creation
//!
//! ```
//! use golara_queue::Job;
//!
//! let job = Job::new("send_welcome").with("to", "user@example.com");
//!
//! assert_eq!(job.name, "send_welcome");
//! assert_eq!(job.payload["to"], "user@example.com");
//! ```
//!
//! ## Queue Configuration
//!
//! ```
//! use golara_queue::{QueueConfig, QueueDriver};
//!
//! let config = QueueConfig::builder()
//!     .driver(QueueDriver::Redis)
//!     .queue_name("emails")
//!     .key_prefix("myapp")
//!     .concurrency(4)
//!     .build();
//!
//! assert_eq!(config.pending_key(), "myapp:emails");
//! assert_eq!(config.worker.concurrency, 4);
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use golara_queue::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> QueueResult<()> {
//!     let config = QueueConfig::from_env().build();
//!     let manager = QueueManager::from_config(&config).await;
//!
//!     manager.register_fn("send_email", |payload| async move {
//!         println!("Sending email to {:?}", payload.get("to"));
//!         Ok(())
//!     });
//!
//!     manager
//!         .dispatch(Job::new("send_email").with("to", "user@example.com"), None)
//!         .await?;
//!     manager
//!         .dispatch_later(Job::new("send_email"), Duration::from_secs(60), None)
//!         .await?;
//!
//!     manager.start_worker(&config.queue_name, config.worker.concurrency).await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     manager.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod job;
pub mod manager;
pub mod queue;
pub mod redis_store;
pub mod registry;
pub mod store;
pub mod worker;

pub use async_trait::async_trait;
pub use config::{DEFAULT_QUEUE_NAME, QueueConfig, QueueDriver, RedisSettings, WorkerConfig};
pub use error::{QueueError, QueueResult};
pub use handler::{HandlerFactory, HandlerFuture, JobHandler};
pub use job::{Job, JobId, Payload, decode_payload};
pub use manager::QueueManager;
pub use queue::{MemoryQueue, Queue, RedisQueue};
pub use redis_store::RedisStore;
pub use registry::JobRegistry;
pub use store::{InMemoryStore, QueueStore};
pub use worker::{Worker, WorkerState, WorkerStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{QueueConfig, QueueDriver, WorkerConfig};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::handler::JobHandler;
    pub use crate::job::{Job, Payload};
    pub use crate::manager::QueueManager;
    pub use crate::queue::{MemoryQueue, Queue, RedisQueue};
    pub use crate::worker::{WorkerState, WorkerStats};
    pub use async_trait::async_trait;
}
