// Golara - background jobs for web applications
//
// This library bundles the job queue engine and the logging setup an
// application needs to dispatch and process background jobs.

// Re-export optional crates
#[cfg(feature = "queue")]
pub use golara_queue;

#[cfg(feature = "queue")]
pub use golara_queue::{Job, QueueConfig, QueueError, QueueManager, QueueResult};

/// Initialize tracing with an `EnvFilter` read from `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Initialize tracing, using `level` when `RUST_LOG` is not set.
pub fn init_tracing_with_level(level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

// Prelude for common imports
pub mod prelude {
    #[cfg(feature = "queue")]
    pub use golara_queue::prelude::*;

    pub use crate::init_tracing;
}
