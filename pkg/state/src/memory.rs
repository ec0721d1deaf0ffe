use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::client::{StateStore, StoreOp};

/// In-process store with the same semantics as the Redis backend.
///
/// Expired keys are hidden from reads immediately and physically dropped on
/// the next write that touches them.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, Value>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, ScoredSet>,
}

struct Value {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Value {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct ScoredSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl ScoredSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(old, member.to_string()));
                true
            }
            None => false,
        }
    }
}

impl MemoryInner {
    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.values.insert(
            key.to_string(),
            Value {
                bytes: value.to_vec(),
                expires_at,
            },
        );
    }

    fn delete(&mut self, key: &str) -> bool {
        match self.values.remove(key) {
            Some(v) => v.is_live(Instant::now()),
            None => false,
        }
    }

    fn rpush(&mut self, list: &str, member: &str) {
        self.lists
            .entry(list.to_string())
            .or_default()
            .push_back(member.to_string());
    }

    fn lrem(&mut self, list: &str, member: &str) -> usize {
        let Some(items) = self.lists.get_mut(list) else {
            return 0;
        };
        let before = items.len();
        items.retain(|m| m != member);
        before - items.len()
    }

    fn zadd(&mut self, set: &str, member: &str, score: i64) {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member, score);
    }

    fn zrem(&mut self, set: &str, member: &str) -> bool {
        self.sets
            .get_mut(set)
            .map(|s| s.remove(member))
            .unwrap_or(false)
    }

    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::Set { key, value, ttl } => self.set(&key, &value, ttl),
            StoreOp::Delete { key } => {
                self.delete(&key);
            }
            StoreOp::RPush { list, member } => self.rpush(&list, &member),
            StoreOp::LRem { list, member } => {
                self.lrem(&list, &member);
            }
            StoreOp::ZAdd { set, member, score } => self.zadd(&set, &member, score),
            StoreOp::ZRem { set, member } => {
                self.zrem(&set, &member);
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let inner = self.inner.read().await;
        let now = Instant::now();
        Ok(inner
            .values
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.bytes.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> anyhow::Result<()> {
        self.inner.write().await.set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.inner.write().await.delete(key))
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn lpop(&self, list: &str) -> anyhow::Result<Option<String>> {
        let mut inner = self.inner.write().await;
        Ok(inner.lists.get_mut(list).and_then(|items| items.pop_front()))
    }

    async fn lpush(&self, list: &str, member: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(member.to_string());
        Ok(())
    }

    async fn rpush(&self, list: &str, member: &str) -> anyhow::Result<()> {
        self.inner.write().await.rpush(list, member);
        Ok(())
    }

    async fn lrem(&self, list: &str, member: &str) -> anyhow::Result<usize> {
        Ok(self.inner.write().await.lrem(list, member))
    }

    async fn llen(&self, list: &str) -> anyhow::Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner.lists.get(list).map(|items| items.len()).unwrap_or(0))
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> anyhow::Result<()> {
        self.inner.write().await.zadd(set, member, score);
        Ok(())
    }

    async fn zrem(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        Ok(self.inner.write().await.zrem(set, member))
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
    ) -> anyhow::Result<Vec<String>> {
        let inner = self.inner.read().await;
        let Some(scored) = inner.sets.get(set) else {
            return Ok(Vec::new());
        };
        Ok(scored
            .ordered
            .iter()
            .skip_while(|(score, _)| *score < min)
            .take_while(|(score, _)| *score <= max)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn zscore(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sets
            .get(set)
            .and_then(|s| s.scores.get(member).copied()))
    }

    async fn zcard(&self, set: &str) -> anyhow::Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner.sets.get(set).map(|s| s.scores.len()).unwrap_or(0))
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        for op in ops {
            inner.apply(op);
        }
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
