//! Backing store used by [`RedisQueue`](crate::RedisQueue).
//!
//! The queue only needs a handful of list and sorted-set operations. They are
//! expressed as the [`QueueStore`] trait so the same queue logic runs against
//! a live Redis server ([`RedisStore`](crate::RedisStore)) or against
//! [`InMemoryStore`] in tests.

use crate::error::QueueResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// List and sorted-set operations backing a durable queue.
///
/// Lists are pushed at the head (`LPUSH`) and popped from the tail (`RPOP`),
/// which gives FIFO order across competing consumers.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Push a member at the head of the list (`LPUSH`).
    async fn push(&self, list: &str, member: &str) -> QueueResult<()>;

    /// Pop from the tail of the list, waiting up to `timeout` for a member.
    async fn pop(&self, list: &str, timeout: Duration) -> QueueResult<Option<String>>;

    /// Length of the list (`LLEN`).
    async fn len(&self, list: &str) -> QueueResult<u64>;

    /// Delete keys (`DEL`).
    async fn delete(&self, keys: &[&str]) -> QueueResult<()>;

    /// Add a member to the sorted set (`ZADD`).
    async fn schedule(&self, set: &str, member: &str, score: f64) -> QueueResult<()>;

    /// Number of members in the sorted set (`ZCARD`).
    async fn scheduled_len(&self, set: &str) -> QueueResult<u64>;

    /// Atomically move up to `limit` members with `score <= now` from `set`
    /// to the head of `list`, lowest score first. Returns how many moved.
    async fn promote_due(&self, set: &str, list: &str, now: f64, limit: usize) -> QueueResult<u64>;

    /// Check the store is reachable.
    async fn ping(&self) -> QueueResult<()>;
}

#[derive(Default)]
struct Tables {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, Vec<(f64, String)>>,
}

/// Process-local [`QueueStore`] with the same semantics as the Redis one.
///
/// Blocking pops wait on a [`Notify`] instead of spinning. Every operation
/// holds a single lock, so `promote_due` is atomic like the Lua script.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    pushed: Arc<Notify>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, list: &str) -> Option<String> {
        self.tables
            .lock()
            .lists
            .get_mut(list)
            .and_then(|items| items.pop_back())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn push(&self, list: &str, member: &str) -> QueueResult<()> {
        self.tables
            .lock()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(member.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, list: &str, timeout: Duration) -> QueueResult<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(member) = self.try_pop(list) {
                return Ok(Some(member));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop(list));
            }
        }
    }

    async fn len(&self, list: &str) -> QueueResult<u64> {
        Ok(self
            .tables
            .lock()
            .lists
            .get(list)
            .map_or(0, |items| items.len() as u64))
    }

    async fn delete(&self, keys: &[&str]) -> QueueResult<()> {
        let mut tables = self.tables.lock();
        for key in keys {
            tables.lists.remove(*key);
            tables.sets.remove(*key);
        }
        Ok(())
    }

    async fn schedule(&self, set: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut tables = self.tables.lock();
        let entries = tables.sets.entry(set.to_string()).or_default();

        // ZADD updates the score of an existing member
        entries.retain(|(_, existing)| existing != member);
        let at = entries.partition_point(|(s, _)| *s <= score);
        entries.insert(at, (score, member.to_string()));
        Ok(())
    }

    async fn scheduled_len(&self, set: &str) -> QueueResult<u64> {
        Ok(self
            .tables
            .lock()
            .sets
            .get(set)
            .map_or(0, |entries| entries.len() as u64))
    }

    async fn promote_due(&self, set: &str, list: &str, now: f64, limit: usize) -> QueueResult<u64> {
        let moved = {
            let mut tables = self.tables.lock();
            let due: Vec<String> = match tables.sets.get_mut(set) {
                Some(entries) => {
                    let count = entries.partition_point(|(s, _)| *s <= now).min(limit);
                    entries.drain(..count).map(|(_, member)| member).collect()
                }
                None => Vec::new(),
            };

            let pending = tables.lists.entry(list.to_string()).or_default();
            for member in &due {
                pending.push_front(member.clone());
            }
            due.len() as u64
        };

        if moved > 0 {
            self.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
