use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::client::{StateStore, StoreOp};

/// Store backed by a Redis server.
///
/// `ConnectionManager` multiplexes one connection and reconnects on failure,
/// so each call clones the manager instead of holding a pooled connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis://host:port/`.
    pub async fn connect(host: &str, port: u16) -> anyhow::Result<Self> {
        let url = format!("redis://{}:{}/", host, port);
        info!("Connecting to Redis at {}", url);

        let client = ::redis::Client::open(url.as_str())
            .map_err(|e| anyhow::anyhow!("Invalid Redis URL {}: {}", url, e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis at {}: {}", url, e))?;
        Ok(Self { conn })
    }
}

fn set_cmd(key: &str, value: &[u8], ttl: Option<Duration>) -> ::redis::Cmd {
    let mut cmd = ::redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        // PX rejects 0; a sub-millisecond TTL still expires almost at once.
        cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
    }
    cmd
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis GET failed: {}", e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        set_cmd(key, value, ttl)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis SET failed: {}", e))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis DEL failed: {}", e))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis EXISTS failed: {}", e))
    }

    async fn lpop(&self, list: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.lpop(list, None)
            .await
            .map_err(|e| anyhow::anyhow!("Redis LPOP failed: {}", e))
    }

    async fn lpush(&self, list: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lpush(list, member)
            .await
            .map_err(|e| anyhow::anyhow!("Redis LPUSH failed: {}", e))?;
        Ok(())
    }

    async fn rpush(&self, list: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .rpush(list, member)
            .await
            .map_err(|e| anyhow::anyhow!("Redis RPUSH failed: {}", e))?;
        Ok(())
    }

    async fn lrem(&self, list: &str, member: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        conn.lrem(list, 0, member)
            .await
            .map_err(|e| anyhow::anyhow!("Redis LREM failed: {}", e))
    }

    async fn llen(&self, list: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        conn.llen(list)
            .await
            .map_err(|e| anyhow::anyhow!("Redis LLEN failed: {}", e))
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zadd(set, member, score)
            .await
            .map_err(|e| anyhow::anyhow!("Redis ZADD failed: {}", e))?;
        Ok(())
    }

    async fn zrem(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(set, member)
            .await
            .map_err(|e| anyhow::anyhow!("Redis ZREM failed: {}", e))?;
        Ok(removed > 0)
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
    ) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrangebyscore(set, min, max)
            .await
            .map_err(|e| anyhow::anyhow!("Redis ZRANGEBYSCORE failed: {}", e))
    }

    async fn zscore(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn
            .zscore(set, member)
            .await
            .map_err(|e| anyhow::anyhow!("Redis ZSCORE failed: {}", e))?;
        Ok(score.map(|s| s as i64))
    }

    async fn zcard(&self, set: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        conn.zcard(set)
            .await
            .map_err(|e| anyhow::anyhow!("Redis ZCARD failed: {}", e))
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> anyhow::Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::Set { key, value, ttl } => {
                    pipe.add_command(set_cmd(key, value, *ttl)).ignore();
                }
                StoreOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
                StoreOp::RPush { list, member } => {
                    pipe.rpush(list, member).ignore();
                }
                StoreOp::LRem { list, member } => {
                    pipe.lrem(list, 0, member).ignore();
                }
                StoreOp::ZAdd { set, member, score } => {
                    pipe.zadd(set, member, *score).ignore();
                }
                StoreOp::ZRem { set, member } => {
                    pipe.zrem(set, member).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis MULTI/EXEC of {} ops failed: {}", ops.len(), e))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        ::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Redis PING failed: {}", e))
    }
}
