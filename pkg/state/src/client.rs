use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to a store backend, injected into whoever owns the data.
pub type StoreHandle = Arc<dyn StateStore>;

/// One write inside an atomic batch submitted through [`StateStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Set a plain key, optionally expiring after `ttl`.
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Delete a plain key.
    Delete { key: String },
    /// Append a member to the tail of a list.
    RPush { list: String, member: String },
    /// Remove every occurrence of a member from a list.
    LRem { list: String, member: String },
    /// Insert a member into a sorted set or update its score.
    ZAdd {
        set: String,
        member: String,
        score: i64,
    },
    /// Remove a member from a sorted set.
    ZRem { set: String, member: String },
}

/// Key-value store with TTL keys, FIFO lists and scored sets.
///
/// Individual calls are atomic on their own; [`StateStore::apply`] makes a
/// whole batch of writes atomic.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Retrieve the value for a key, or `None` if it does not exist or has expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Store a value under the given key, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Pop the head of a list.
    async fn lpop(&self, list: &str) -> anyhow::Result<Option<String>>;

    /// Put back at the head of a list.
    async fn lpush(&self, list: &str, member: &str) -> anyhow::Result<()>;

    /// Append to the tail of a list.
    async fn rpush(&self, list: &str, member: &str) -> anyhow::Result<()>;

    /// Remove every occurrence of `member`. Returns how many were removed.
    async fn lrem(&self, list: &str, member: &str) -> anyhow::Result<usize>;

    async fn llen(&self, list: &str) -> anyhow::Result<usize>;

    /// Insert or rescore a sorted-set member.
    async fn zadd(&self, set: &str, member: &str, score: i64) -> anyhow::Result<()>;

    /// Remove a sorted-set member. Returns whether it was present.
    async fn zrem(&self, set: &str, member: &str) -> anyhow::Result<bool>;

    /// Members with `min <= score <= max`, lowest score first.
    async fn zrange_by_score(&self, set: &str, min: i64, max: i64)
    -> anyhow::Result<Vec<String>>;

    async fn zscore(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>>;

    async fn zcard(&self, set: &str) -> anyhow::Result<usize>;

    /// Apply a batch of writes as one unit: either all are visible or none.
    async fn apply(&self, ops: Vec<StoreOp>) -> anyhow::Result<()>;

    /// Round-trip check used by health checks.
    async fn ping(&self) -> anyhow::Result<()>;
}
