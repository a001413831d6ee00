//! Handler registry mapping job names to handler factories.

use crate::error::QueueResult;
use crate::handler::{FnHandler, HandlerFactory, JobHandler};
use crate::job::Payload;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Registry of job handler factories.
///
/// Cloning is cheap and clones share the same table, so handlers registered
/// after a worker has started are visible to its pollers.
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: Arc<RwLock<HashMap<String, HandlerFactory>>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, factory: HandlerFactory) {
        let name = name.into();
        if self.factories.write().insert(name.clone(), factory).is_some() {
            debug!(job = %name, "Replaced job handler factory");
        }
    }

    /// Register a handler type constructed with `Default`.
    pub fn register_handler<H>(&self, name: impl Into<String>)
    where
        H: JobHandler + Default,
    {
        self.register(name, Arc::new(|| Box::new(H::default()) as Box<dyn JobHandler>));
    }

    /// Register an async closure as the handler for `name`.
    ///
    /// # Examples
    ///
    /// ```
    /// use golara_queue::JobRegistry;
    ///
    /// let registry = JobRegistry::new();
    /// registry.register_fn("send_email", |payload| async move {
    ///     println!("Sending email to {:?}", payload.get("to"));
    ///     Ok(())
    /// });
    ///
    /// assert!(registry.contains("send_email"));
    /// ```
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        self.register(name, FnHandler::factory(func));
    }

    /// Look up the factory for `name`.
    pub fn factory(&self, name: &str) -> Option<HandlerFactory> {
        self.factories.read().get(name).cloned()
    }

    /// Check if a job name has a handler.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered job names.
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Whether no handler has been registered.
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.job_names())
            .finish()
    }
}
