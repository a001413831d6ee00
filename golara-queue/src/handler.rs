//! Job handlers and the factories that build them.
//!
//! A handler is created fresh for every job: the worker calls the registered
//! factory, injects the job payload with [`JobHandler::set_payload`], then
//! awaits [`JobHandler::handle`].

use crate::error::QueueResult;
use crate::job::Payload;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Executable logic for one kind of job.
///
/// # Examples
///
/// ```
/// use golara_queue::{JobHandler, Payload, QueueResult, async_trait};
///
/// #[derive(Default)]
/// struct SendEmail {
///     payload: Payload,
/// }
///
/// #[async_trait]
/// impl JobHandler for SendEmail {
///     fn set_payload(&mut self, payload: Payload) {
///         self.payload = payload;
///     }
///
///     async fn handle(&mut self) -> QueueResult<()> {
///         let _to = self.payload.get("to");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + 'static {
    /// Receive the payload of the job about to be handled.
    fn set_payload(&mut self, payload: Payload);

    /// Run the job.
    async fn handle(&mut self) -> QueueResult<()>;
}

/// Factory producing a fresh handler instance per job.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn JobHandler> + Send + Sync>;

/// Boxed future returned by closure handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = QueueResult<()>> + Send>>;

type HandlerFn = Arc<dyn Fn(Payload) -> HandlerFuture + Send + Sync>;

/// Adapts an async closure taking the payload into a [`JobHandler`].
pub(crate) struct FnHandler {
    func: HandlerFn,
    payload: Payload,
}

impl FnHandler {
    /// Build a factory that wraps `func` in a new `FnHandler` for every job.
    pub(crate) fn factory<F, Fut>(func: F) -> HandlerFactory
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let func: HandlerFn = Arc::new(move |payload| -> HandlerFuture { Box::pin(func(payload)) });
        Arc::new(move || {
            Box::new(FnHandler {
                func: func.clone(),
                payload: Payload::new(),
            }) as Box<dyn JobHandler>
        })
    }
}

#[async_trait]
impl JobHandler for FnHandler {
    fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    async fn handle(&mut self) -> QueueResult<()> {
        (self.func)(std::mem::take(&mut self.payload)).await
    }
}
