//! Queue and worker configuration.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default queue name.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDriver {
    /// Process-local queue (development and tests)
    #[default]
    Memory,
    /// Redis list + sorted set
    Redis,
}

impl QueueDriver {
    /// Parse a driver name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "sync" => Some(QueueDriver::Memory),
            "redis" => Some(QueueDriver::Redis),
            _ => None,
        }
    }
}

/// Redis connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Host name
    pub host: String,
    /// Port
    pub port: u16,
    /// Password (none when empty)
    pub password: Option<String>,
    /// Database number
    pub database: u8,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            database: 0,
        }
    }
}

// Keeps the password out of logs
impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

impl RedisSettings {
    /// Get the full Redis URL with auth and database.
    ///
    /// The password is percent-encoded so `@`, `/` and `:` survive URL parsing.
    pub fn connection_url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                utf8_percent_encode(password, NON_ALPHANUMERIC),
                self.host,
                self.port,
                self.database
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

/// Worker pool tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent pollers
    pub concurrency: usize,

    /// Upper bound on how long a single pop waits for a job
    #[serde(with = "millis", default = "default_poll_timeout")]
    pub poll_timeout: Duration,

    /// Sleep after a pop that found nothing
    #[serde(with = "millis", default = "default_idle_backoff")]
    pub idle_backoff: Duration,

    /// Sleep after a pop that failed
    #[serde(with = "millis", default = "default_error_backoff")]
    pub error_backoff: Duration,

    /// Maximum delayed jobs promoted by one sweep
    pub promote_batch: usize,
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_idle_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_timeout: default_poll_timeout(),
            idle_backoff: default_idle_backoff(),
            error_backoff: default_error_backoff(),
            promote_batch: 1000,
        }
    }
}

impl WorkerConfig {
    /// Set the number of pollers.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the pop wait bound.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the sleep after an empty pop.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Set the sleep after a failed pop.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Queue system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Backend used for the configured queue
    pub driver: QueueDriver,
    /// Queue name
    pub queue_name: String,
    /// Optional prefix prepended to Redis keys (`{prefix}:{queue}`)
    pub key_prefix: Option<String>,
    /// Redis connection settings
    pub redis: RedisSettings,
    /// Worker tuning
    pub worker: WorkerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            driver: QueueDriver::default(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            key_prefix: None,
            redis: RedisSettings::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Create a builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `QUEUE_CONNECTION`, `QUEUE_NAME`, `QUEUE_PREFIX`,
    /// `QUEUE_CONCURRENCY`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` and
    /// `REDIS_DB`. Values that fail to parse leave the default in place.
    pub fn from_env() -> QueueConfigBuilder {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueConfigBuilder {
        let mut builder = QueueConfigBuilder::new();

        if let Some(driver) = lookup("QUEUE_CONNECTION").and_then(|s| QueueDriver::parse(&s)) {
            builder = builder.driver(driver);
        }

        if let Some(name) = lookup("QUEUE_NAME").filter(|s| !s.is_empty()) {
            builder = builder.queue_name(name);
        }

        if let Some(prefix) = lookup("QUEUE_PREFIX").filter(|s| !s.is_empty()) {
            builder = builder.key_prefix(prefix);
        }

        if let Some(concurrency) = lookup("QUEUE_CONCURRENCY").and_then(|s| s.parse().ok()) {
            builder = builder.concurrency(concurrency);
        }

        if let Some(host) = lookup("REDIS_HOST").filter(|s| !s.is_empty()) {
            builder = builder.redis_host(host);
        }

        if let Some(port) = lookup("REDIS_PORT").and_then(|s| s.parse().ok()) {
            builder = builder.redis_port(port);
        }

        if let Some(password) = lookup("REDIS_PASSWORD").filter(|s| !s.is_empty()) {
            builder = builder.redis_password(password);
        }

        if let Some(db) = lookup("REDIS_DB").and_then(|s| s.parse().ok()) {
            builder = builder.redis_database(db);
        }

        builder
    }

    /// Redis key of the pending list.
    pub fn pending_key(&self) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, self.queue_name),
            None => self.queue_name.clone(),
        }
    }
}

/// Builder for queue configuration.
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend.
    pub fn driver(mut self, driver: QueueDriver) -> Self {
        self.config.driver = driver;
        self
    }

    /// Set the queue name.
    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.queue_name = name.into();
        self
    }

    /// Set the Redis key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = Some(prefix.into());
        self
    }

    /// Set the Redis host.
    pub fn redis_host(mut self, host: impl Into<String>) -> Self {
        self.config.redis.host = host.into();
        self
    }

    /// Set the Redis port.
    pub fn redis_port(mut self, port: u16) -> Self {
        self.config.redis.port = port;
        self
    }

    /// Set the Redis password.
    pub fn redis_password(mut self, password: impl Into<String>) -> Self {
        self.config.redis.password = Some(password.into());
        self
    }

    /// Set the Redis database number.
    pub fn redis_database(mut self, db: u8) -> Self {
        self.config.redis.database = db;
        self
    }

    /// Set the number of pollers started for the configured queue.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.worker.concurrency = concurrency;
        self
    }

    /// Replace the worker tuning.
    pub fn worker(mut self, worker: WorkerConfig) -> Self {
        self.config.worker = worker;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
