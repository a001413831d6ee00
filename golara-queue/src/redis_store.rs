//! [`QueueStore`] backed by a Redis server.

use crate::error::{QueueError, QueueResult};
use crate::store::QueueStore;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Pause between empty `RPOP`s while a pop waits for a job.
const POP_INTERVAL: Duration = Duration::from_millis(50);

/// Moves due members of a sorted set to the head of a list in one step.
///
/// KEYS[1] = delayed set, KEYS[2] = pending list
/// ARGV[1] = now (unix seconds), ARGV[2] = batch limit
const PROMOTE_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, member in ipairs(due) do
    redis.call('LPUSH', KEYS[2], member)
    redis.call('ZREM', KEYS[1], member)
end
return #due
"#;

/// Redis connection shared by every queue built on it.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    promote: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = Client::open(url).map_err(|e| QueueError::Config(e.to_string()))?;
        let connection = ConnectionManager::new(client).await?;

        info!("Connected queue store to Redis");
        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            promote: Script::new(PROMOTE_DUE),
        }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(&self, list: &str, member: &str) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.lpush(list, member).await?;
        Ok(())
    }

    async fn pop(&self, list: &str, timeout: Duration) -> QueueResult<Option<String>> {
        let mut conn = self.connection.clone();
        let deadline = Instant::now() + timeout;

        // RPOP never blocks the shared multiplexed connection
        loop {
            let member: Option<String> = conn.rpop(list, None).await?;
            if member.is_some() {
                return Ok(member);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn len(&self, list: &str) -> QueueResult<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.llen(list).await?;
        Ok(len)
    }

    async fn delete(&self, keys: &[&str]) -> QueueResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn schedule(&self, set: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.zadd(set, member, score).await?;
        Ok(())
    }

    async fn scheduled_len(&self, set: &str) -> QueueResult<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.zcard(set).await?;
        Ok(len)
    }

    async fn promote_due(&self, set: &str, list: &str, now: f64, limit: usize) -> QueueResult<u64> {
        let mut conn = self.connection.clone();
        let moved: u64 = self
            .promote
            .key(set)
            .key(list)
            .arg(now)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
