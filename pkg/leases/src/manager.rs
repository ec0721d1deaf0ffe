use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pkg_constants::lease::{
    DEFAULT_BLOCKING_TTL_SECS, DEFAULT_LEASE_TTL_SECS, DEFAULT_REQUEUE_ON_RELEASE,
    DEFAULT_STORE_TIMEOUT_MS, MAX_TTL_SECS,
};
use pkg_constants::state::{AVAILABLE_QUEUE_KEY, EXPIRY_INDEX_KEY, blocking_marker_key};
use pkg_state::{StoreHandle, StoreOp};
use pkg_types::lease::Lease;
use pkg_types::validate::validate_lease_id;

use crate::clock::{Clock, SystemClock};
use crate::error::{LeaseError, LeaseResult};
use crate::locks::KeyLocks;

/// Body of the blocking marker. Only its presence and TTL matter.
const BLOCKING_MARKER_VALUE: &[u8] = br#"{"is_blocked":true}"#;

/// Tunables for [`LeaseManager`].
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Lifetime granted by create and by every keepalive.
    pub lease_ttl: Duration,
    /// Lifetime of the `blocking:<id>` marker written on checkout.
    pub blocking_ttl: Duration,
    /// Upper bound on each store round-trip.
    pub store_timeout: Duration,
    /// Put a released lease back at the tail of the availability queue.
    pub requeue_on_release: bool,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            blocking_ttl: Duration::from_secs(DEFAULT_BLOCKING_TTL_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            requeue_on_release: DEFAULT_REQUEUE_ON_RELEASE,
        }
    }
}

impl LeaseConfig {
    /// Reject settings the lease arithmetic cannot carry.
    pub fn validate(&self) -> anyhow::Result<()> {
        let max = Duration::from_secs(MAX_TTL_SECS);
        for (name, ttl) in [
            ("lease TTL", self.lease_ttl),
            ("blocking TTL", self.blocking_ttl),
        ] {
            if ttl.is_zero() || ttl > max {
                anyhow::bail!(
                    "{} must be between 1s and {}s, got {:?}",
                    name,
                    MAX_TTL_SECS,
                    ttl
                );
            }
        }
        if self.store_timeout.is_zero() {
            anyhow::bail!("store timeout must be positive");
        }
        Ok(())
    }
}

/// Pool occupancy as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Leases with an expiry index entry.
    pub leases: usize,
    /// Ids waiting in the availability queue.
    pub available: usize,
}

/// Owner of the lease pool.
///
/// All writes to the record map, the availability queue, the expiry index
/// and the blocking markers go through here. Operations on the same id are
/// serialized through [`KeyLocks`]; operations on different ids run freely.
pub struct LeaseManager {
    store: StoreHandle,
    config: LeaseConfig,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl LeaseManager {
    pub fn new(store: StoreHandle, config: LeaseConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: StoreHandle, config: LeaseConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            locks: KeyLocks::new(),
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Current time at the millisecond precision the records are stored with.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    /// Lease lifetime, capped so expiries stay within RFC 3339's four-digit years.
    fn lease_ttl(&self) -> chrono::Duration {
        let cap = chrono::Duration::seconds(MAX_TTL_SECS as i64);
        chrono::Duration::from_std(self.config.lease_ttl)
            .map(|ttl| ttl.min(cap))
            .unwrap_or(cap)
    }

    /// Run one store call under the configured timeout.
    async fn store_call<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> LeaseResult<T> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LeaseError::StoreUnavailable(format!("{}: {}", what, e))),
            Err(_) => Err(LeaseError::StoreUnavailable(format!(
                "{}: timed out after {}ms",
                what,
                self.config.store_timeout.as_millis()
            ))),
        }
    }

    async fn commit(&self, what: &str, ops: Vec<StoreOp>) -> LeaseResult<()> {
        self.store_call(what, self.store.apply(ops)).await
    }

    fn encode(lease: &Lease) -> LeaseResult<Vec<u8>> {
        lease.encode().map_err(|e| LeaseError::MalformedRecord {
            id: lease.id.clone(),
            reason: e.to_string(),
        })
    }

    fn check_id(id: &str) -> LeaseResult<()> {
        validate_lease_id(id).map_err(|e| {
            debug!("Rejecting lease id: {}", e);
            LeaseError::NotFound(id.to_string())
        })
    }

    /// Read and decode a record. A malformed record surfaces as `MalformedRecord`.
    async fn load(&self, id: &str) -> LeaseResult<Lease> {
        let bytes = self
            .store_call("get lease", self.store.get(id))
            .await?
            .ok_or_else(|| LeaseError::NotFound(id.to_string()))?;
        Lease::decode(id, &bytes).map_err(|e| {
            warn!("Lease {} has an unreadable record: {}", id, e);
            LeaseError::MalformedRecord {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Mint a new lease, queue it for checkout and index its expiry.
    pub async fn create(&self) -> LeaseResult<Lease> {
        let now = self.now();
        let lease = Lease::new(Uuid::new_v4().to_string(), now, self.lease_ttl());
        let ops = vec![
            StoreOp::Set {
                key: lease.id.clone(),
                value: Self::encode(&lease)?,
                ttl: None,
            },
            StoreOp::RPush {
                list: AVAILABLE_QUEUE_KEY.to_string(),
                member: lease.id.clone(),
            },
            StoreOp::ZAdd {
                set: EXPIRY_INDEX_KEY.to_string(),
                member: lease.id.clone(),
                score: lease.expiry_score(),
            },
        ];
        self.commit("create lease", ops).await?;
        info!("Created lease {} (expires {})", lease.id, lease.expiry);
        Ok(lease)
    }

    /// Snapshot of one lease. Never mutates anything.
    pub async fn describe(&self, id: &str) -> LeaseResult<Lease> {
        Self::check_id(id)?;
        let mut lease = self.load(id).await.map_err(LeaseError::into_public)?;
        lease.is_active = !lease.is_expired_at(self.now());
        Ok(lease)
    }

    /// Claim the oldest available lease.
    ///
    /// Ids whose record is gone, unreadable, already blocked or already past
    /// expiry are dropped from the queue and the next one is tried. Returns
    /// `NoneAvailable` as soon as the queue is empty; it never waits.
    pub async fn checkout(&self) -> LeaseResult<Lease> {
        loop {
            let Some(id) = self
                .store_call("pop available lease", self.store.lpop(AVAILABLE_QUEUE_KEY))
                .await?
            else {
                return Err(LeaseError::NoneAvailable);
            };

            let _guard = self.locks.lock(&id).await;
            let mut lease = match self.load(&id).await {
                Ok(lease) => lease,
                Err(LeaseError::NotFound(_)) | Err(LeaseError::MalformedRecord { .. }) => {
                    debug!("Skipping dangling lease {} from the availability queue", id);
                    continue;
                }
                Err(e) => {
                    warn!("Lease {} was popped but could not be read: {}", id, e);
                    self.restore_to_queue(&id).await;
                    return Err(e);
                }
            };

            let now = self.now();
            if lease.is_blocked {
                debug!("Skipping lease {}: already checked out", id);
                continue;
            }
            if lease.is_expired_at(now) {
                debug!("Skipping lease {}: expired at {}", id, lease.expiry);
                continue;
            }

            lease.is_blocked = true;
            lease.is_active = true;
            lease.blocked_at = Some(now);
            let ops = vec![
                StoreOp::Set {
                    key: id.clone(),
                    value: Self::encode(&lease)?,
                    ttl: None,
                },
                StoreOp::Set {
                    key: blocking_marker_key(&id),
                    value: BLOCKING_MARKER_VALUE.to_vec(),
                    ttl: Some(self.config.blocking_ttl),
                },
            ];
            if let Err(e) = self.commit("checkout lease", ops).await {
                self.restore_to_queue(&id).await;
                return Err(e);
            }
            info!("Checked out lease {}", id);
            return Ok(lease);
        }
    }

    /// Put a popped id back at the head of the queue after a checkout that
    /// could not finish.
    async fn restore_to_queue(&self, id: &str) {
        match self
            .store_call(
                "restore lease to queue",
                self.store.lpush(AVAILABLE_QUEUE_KEY, id),
            )
            .await
        {
            Ok(()) => debug!("Returned lease {} to the head of the queue", id),
            Err(e) => warn!("Lease {} left the queue and was not restored: {}", id, e),
        }
    }

    /// Unblock a lease. Re-queues it only when `requeue_on_release` is set.
    pub async fn release(&self, id: &str) -> LeaseResult<Lease> {
        Self::check_id(id)?;
        let _guard = self.locks.lock(id).await;
        let mut lease = self.load(id).await.map_err(LeaseError::into_public)?;

        let now = self.now();
        let was_blocked = lease.is_blocked;
        lease.is_blocked = false;
        lease.is_active = !lease.is_expired_at(now);

        let mut ops = vec![
            StoreOp::Set {
                key: id.to_string(),
                value: Self::encode(&lease)?,
                ttl: None,
            },
            StoreOp::Delete {
                key: blocking_marker_key(id),
            },
        ];
        let requeue = self.config.requeue_on_release && was_blocked && lease.is_active;
        if requeue {
            // LREM first keeps the id unique in the queue.
            ops.push(StoreOp::LRem {
                list: AVAILABLE_QUEUE_KEY.to_string(),
                member: id.to_string(),
            });
            ops.push(StoreOp::RPush {
                list: AVAILABLE_QUEUE_KEY.to_string(),
                member: id.to_string(),
            });
        }
        self.commit("release lease", ops).await?;
        info!("Released lease {} (requeued={})", id, requeue);
        Ok(lease)
    }

    /// Push the expiry of a lease out to `now + lease_ttl`. Returns the new expiry.
    pub async fn keepalive(&self, id: &str) -> LeaseResult<DateTime<Utc>> {
        Self::check_id(id)?;
        let _guard = self.locks.lock(id).await;
        let mut lease = self.load(id).await.map_err(LeaseError::into_public)?;

        let now = self.now();
        let mut expiry = now + self.lease_ttl();
        if expiry <= lease.expiry {
            expiry = lease.expiry + chrono::Duration::milliseconds(1);
        }
        lease.expiry = expiry;
        lease.updated_at = Some(now);
        lease.is_active = true;

        let ops = vec![
            StoreOp::Set {
                key: id.to_string(),
                value: Self::encode(&lease)?,
                ttl: None,
            },
            StoreOp::ZAdd {
                set: EXPIRY_INDEX_KEY.to_string(),
                member: id.to_string(),
                score: lease.expiry_score(),
            },
        ];
        self.commit("keepalive lease", ops).await?;
        debug!("Lease {} kept alive until {}", id, expiry);
        Ok(expiry)
    }

    /// Remove a lease together with its index entry, marker and queue slot.
    ///
    /// Returns `NotFound` when there was no record, after still clearing any
    /// leftover index entry, marker or queue slot for the id.
    pub async fn delete(&self, id: &str) -> LeaseResult<()> {
        Self::check_id(id)?;
        let _guard = self.locks.lock(id).await;
        let existed = self
            .store_call("check lease", self.store.exists(id))
            .await?;

        self.commit("delete lease", Self::removal_ops(id)).await?;

        if existed {
            info!("Deleted lease {}", id);
            Ok(())
        } else {
            Err(LeaseError::NotFound(id.to_string()))
        }
    }

    /// Delete a lease taken from an expiry scan, provided it is still expired
    /// at `now` once its critical section is held.
    ///
    /// Returns `Ok(false)` and leaves the lease alone when a keepalive moved
    /// its expiry past `now` after the scan. An unreadable record counts as
    /// expired. `NotFound` means the record was already gone; any leftover
    /// index entry, marker or queue slot is still cleared.
    pub async fn reclaim_expired(&self, id: &str, now: DateTime<Utc>) -> LeaseResult<bool> {
        Self::check_id(id)?;
        let _guard = self.locks.lock(id).await;
        match self.load(id).await {
            Ok(lease) if !lease.is_expired_at(now) => {
                debug!(
                    "Lease {} was kept alive until {}; not reclaiming",
                    id, lease.expiry
                );
                return Ok(false);
            }
            Ok(_) | Err(LeaseError::MalformedRecord { .. }) => {}
            Err(LeaseError::NotFound(_)) => {
                self.commit("clear reclaimed lease", Self::removal_ops(id))
                    .await?;
                return Err(LeaseError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e),
        }

        self.commit("reclaim lease", Self::removal_ops(id)).await?;
        info!("Reclaimed expired lease {}", id);
        Ok(true)
    }

    /// Record, index entry, marker and queue slot of one id.
    fn removal_ops(id: &str) -> Vec<StoreOp> {
        vec![
            StoreOp::Delete { key: id.to_string() },
            StoreOp::ZRem {
                set: EXPIRY_INDEX_KEY.to_string(),
                member: id.to_string(),
            },
            StoreOp::Delete {
                key: blocking_marker_key(id),
            },
            StoreOp::LRem {
                list: AVAILABLE_QUEUE_KEY.to_string(),
                member: id.to_string(),
            },
        ]
    }

    /// Ids whose indexed expiry is at or before `now`, oldest first.
    pub async fn expired(&self, now: DateTime<Utc>) -> LeaseResult<Vec<String>> {
        self.store_call(
            "scan expiry index",
            self.store
                .zrange_by_score(EXPIRY_INDEX_KEY, i64::MIN, now.timestamp_millis()),
        )
        .await
    }

    pub async fn stats(&self) -> LeaseResult<PoolStats> {
        let leases = self
            .store_call("count leases", self.store.zcard(EXPIRY_INDEX_KEY))
            .await?;
        let available = self
            .store_call("count available", self.store.llen(AVAILABLE_QUEUE_KEY))
            .await?;
        Ok(PoolStats { leases, available })
    }

    pub async fn ping(&self) -> LeaseResult<()> {
        self.store_call("ping", self.store.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use async_trait::async_trait;
    use pkg_state::{MemoryStore, StateStore};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn setup(config: LeaseConfig) -> (Arc<LeaseManager>, MemoryStore, Arc<ManualClock>) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let manager = LeaseManager::with_clock(Arc::new(store.clone()), config, clock.clone());
        (Arc::new(manager), store, clock)
    }

    async fn queue(store: &MemoryStore) -> Vec<String> {
        let mut ids = Vec::new();
        let copy = store.clone();
        while let Some(id) = copy.lpop(AVAILABLE_QUEUE_KEY).await.unwrap() {
            ids.push(id);
        }
        for id in &ids {
            copy.rpush(AVAILABLE_QUEUE_KEY, id).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn test_create_sets_expiry_from_ttl() {
        let (manager, store, _) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();

        let described = manager.describe(&lease.id).await.unwrap();
        assert_eq!(described.expiry, described.created_at + chrono::Duration::seconds(300));
        assert_eq!(described.created_at, start());
        assert!(described.is_active);
        assert!(!described.is_blocked);

        assert_eq!(queue(&store).await, vec![lease.id.clone()]);
        assert_eq!(
            store.zscore(EXPIRY_INDEX_KEY, &lease.id).await.unwrap(),
            Some(described.expiry.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (manager, _, _) = setup(LeaseConfig::default());
        let mut ids = HashSet::new();
        for _ in 0..50 {
            assert!(ids.insert(manager.create().await.unwrap().id));
        }
    }

    #[tokio::test]
    async fn test_describe_unknown_and_malformed() {
        let (manager, store, _) = setup(LeaseConfig::default());
        assert!(matches!(
            manager.describe("nope").await,
            Err(LeaseError::NotFound(_))
        ));

        store.set("broken", b"{\"is_blocked\":1", None).await.unwrap();
        assert!(matches!(
            manager.describe("broken").await,
            Err(LeaseError::NotFound(_))
        ));

        // Reserved keys are never treated as leases.
        assert!(matches!(
            manager.describe(EXPIRY_INDEX_KEY).await,
            Err(LeaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_describe_reports_inactive_after_expiry() {
        let (manager, _, clock) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();
        clock.advance(chrono::Duration::seconds(300));
        let described = manager.describe(&lease.id).await.unwrap();
        assert!(!described.is_active);
    }

    #[tokio::test]
    async fn test_checkout_is_fifo_and_blocks() {
        let (manager, store, _) = setup(LeaseConfig::default());
        let first = manager.create().await.unwrap();
        let second = manager.create().await.unwrap();

        let got = manager.checkout().await.unwrap();
        assert_eq!(got.id, first.id);
        assert!(got.is_blocked);

        let described = manager.describe(&first.id).await.unwrap();
        assert!(described.is_blocked);
        assert_eq!(described.blocked_at, Some(start()));
        assert!(store.exists(&blocking_marker_key(&first.id)).await.unwrap());
        // The expiry keeps running while checked out.
        assert!(store.zscore(EXPIRY_INDEX_KEY, &first.id).await.unwrap().is_some());

        assert_eq!(manager.checkout().await.unwrap().id, second.id);
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::NoneAvailable)
        ));
    }

    #[tokio::test]
    async fn test_checkout_on_empty_pool() {
        let (manager, _, _) = setup(LeaseConfig::default());
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::NoneAvailable)
        ));
    }

    #[tokio::test]
    async fn test_checkout_skips_dangling_ids() {
        let (manager, store, _) = setup(LeaseConfig::default());
        let dead = manager.create().await.unwrap();
        let live = manager.create().await.unwrap();

        // Reclaimed behind the manager's back: the id stays queued.
        store.delete(&dead.id).await.unwrap();
        store.rpush(AVAILABLE_QUEUE_KEY, "never-created").await.unwrap();

        let got = manager.checkout().await.unwrap();
        assert_eq!(got.id, live.id);
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::NoneAvailable)
        ));
        assert!(!store.exists(&blocking_marker_key(&dead.id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_checkout_skips_expired_leases() {
        let (manager, _, clock) = setup(LeaseConfig::default());
        manager.create().await.unwrap();
        clock.advance(chrono::Duration::seconds(301));
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::NoneAvailable)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_checkout_has_one_holder() {
        let (manager, _, _) = setup(LeaseConfig::default());
        let mut created = HashSet::new();
        for _ in 0..5 {
            created.insert(manager.create().await.unwrap().id);
        }

        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.checkout().await }));
        }

        let mut holders = HashSet::new();
        let mut empty = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(lease) => assert!(holders.insert(lease.id), "lease handed out twice"),
                Err(LeaseError::NoneAvailable) => empty += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(holders, created);
        assert_eq!(empty, 15);
    }

    #[tokio::test]
    async fn test_checkout_racing_delete_never_returns_dead_id() {
        let (manager, store, _) = setup(LeaseConfig::default());
        for _ in 0..10 {
            let lease = manager.create().await.unwrap();
            let deleter = {
                let manager = manager.clone();
                let id = lease.id.clone();
                tokio::spawn(async move { manager.delete(&id).await })
            };
            let checkout = manager.checkout().await;
            deleter.await.unwrap().unwrap();

            if let Ok(got) = checkout {
                assert_eq!(got.id, lease.id);
            }
            // Whichever won, nothing of the lease survives the delete.
            assert!(!store.exists(&lease.id).await.unwrap());
            assert!(!store.exists(&blocking_marker_key(&lease.id)).await.unwrap());
            assert!(queue(&store).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_release_clears_block_and_keeps_fields() {
        let (manager, store, clock) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();
        manager.checkout().await.unwrap();
        clock.advance(chrono::Duration::seconds(10));

        let released = manager.release(&lease.id).await.unwrap();
        assert!(!released.is_blocked);
        assert_eq!(released.created_at, lease.created_at);
        assert_eq!(released.expiry, lease.expiry);
        assert!(!store.exists(&blocking_marker_key(&lease.id)).await.unwrap());

        // Not re-queued by default.
        assert!(queue(&store).await.is_empty());
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::NoneAvailable)
        ));
    }

    #[tokio::test]
    async fn test_release_requeues_when_enabled() {
        let config = LeaseConfig {
            requeue_on_release: true,
            ..LeaseConfig::default()
        };
        let (manager, store, _) = setup(config);
        let lease = manager.create().await.unwrap();
        manager.checkout().await.unwrap();

        manager.release(&lease.id).await.unwrap();
        // A second release of an unblocked lease must not queue it twice.
        manager.release(&lease.id).await.unwrap();
        assert_eq!(queue(&store).await, vec![lease.id.clone()]);

        assert_eq!(manager.checkout().await.unwrap().id, lease.id);
    }

    #[tokio::test]
    async fn test_release_unknown() {
        let (manager, _, _) = setup(LeaseConfig::default());
        assert!(matches!(
            manager.release("missing").await,
            Err(LeaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_keepalive_advances_expiry() {
        let (manager, store, clock) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();
        manager.checkout().await.unwrap();

        clock.advance(chrono::Duration::seconds(120));
        let expiry = manager.keepalive(&lease.id).await.unwrap();
        assert_eq!(expiry, start() + chrono::Duration::seconds(420));

        let described = manager.describe(&lease.id).await.unwrap();
        assert_eq!(described.expiry, expiry);
        assert_eq!(described.created_at, lease.created_at);
        assert_eq!(described.updated_at, Some(start() + chrono::Duration::seconds(120)));
        assert!(described.is_blocked);
        assert_eq!(
            store.zscore(EXPIRY_INDEX_KEY, &lease.id).await.unwrap(),
            Some(expiry.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_keepalive_strictly_advances_without_clock_movement() {
        let (manager, _, _) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();
        let first = manager.keepalive(&lease.id).await.unwrap();
        let second = manager.keepalive(&lease.id).await.unwrap();
        assert!(first > lease.expiry);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_keepalive_unknown() {
        let (manager, _, _) = setup(LeaseConfig::default());
        assert!(matches!(
            manager.keepalive("missing").await,
            Err(LeaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let (manager, store, _) = setup(LeaseConfig::default());
        let queued = manager.create().await.unwrap();
        let held = manager.create().await.unwrap();
        manager.checkout().await.unwrap();

        manager.delete(&held.id).await.unwrap();
        manager.delete(&queued.id).await.unwrap();

        for id in [&held.id, &queued.id] {
            assert!(matches!(
                manager.describe(id).await,
                Err(LeaseError::NotFound(_))
            ));
            assert_eq!(store.zscore(EXPIRY_INDEX_KEY, id).await.unwrap(), None);
            assert!(!store.exists(&blocking_marker_key(id)).await.unwrap());
        }
        assert!(queue(&store).await.is_empty());

        assert!(matches!(
            manager.delete(&held.id).await,
            Err(LeaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_clears_orphaned_index_entry() {
        let (manager, store, _) = setup(LeaseConfig::default());
        store.zadd(EXPIRY_INDEX_KEY, "orphan", 1).await.unwrap();
        assert!(matches!(
            manager.delete("orphan").await,
            Err(LeaseError::NotFound(_))
        ));
        assert_eq!(store.zcard(EXPIRY_INDEX_KEY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_and_stats() {
        let (manager, _, clock) = setup(LeaseConfig::default());
        let old = manager.create().await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
        let young = manager.create().await.unwrap();

        let at_old_expiry = manager.expired(old.expiry).await.unwrap();
        assert_eq!(at_old_expiry, vec![old.id.clone()]);
        assert_eq!(
            manager.expired(young.expiry).await.unwrap(),
            vec![old.id, young.id]
        );

        manager.checkout().await.unwrap();
        assert_eq!(
            manager.stats().await.unwrap(),
            PoolStats {
                leases: 2,
                available: 1
            }
        );
    }

    #[tokio::test]
    async fn test_reclaim_skips_lease_kept_alive_after_scan() {
        let (manager, store, clock) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();
        clock.set(lease.expiry);

        let scanned = manager.expired(lease.expiry).await.unwrap();
        assert_eq!(scanned, vec![lease.id.clone()]);
        let renewed = manager.keepalive(&lease.id).await.unwrap();

        assert!(!manager.reclaim_expired(&lease.id, lease.expiry).await.unwrap());
        let described = manager.describe(&lease.id).await.unwrap();
        assert_eq!(described.expiry, renewed);
        assert_eq!(
            store.zscore(EXPIRY_INDEX_KEY, &lease.id).await.unwrap(),
            Some(renewed.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_reclaim_removes_expired_and_malformed() {
        let (manager, store, _) = setup(LeaseConfig::default());
        let lease = manager.create().await.unwrap();
        assert!(manager.reclaim_expired(&lease.id, lease.expiry).await.unwrap());
        assert!(!store.exists(&lease.id).await.unwrap());
        assert!(queue(&store).await.is_empty());

        store.set("broken", b"{}", None).await.unwrap();
        store.zadd(EXPIRY_INDEX_KEY, "broken", 1).await.unwrap();
        assert!(manager.reclaim_expired("broken", start()).await.unwrap());
        assert!(!store.exists("broken").await.unwrap());

        store.zadd(EXPIRY_INDEX_KEY, "orphan", 1).await.unwrap();
        assert!(matches!(
            manager.reclaim_expired("orphan", start()).await,
            Err(LeaseError::NotFound(_))
        ));
        assert_eq!(store.zcard(EXPIRY_INDEX_KEY).await.unwrap(), 0);
    }

    /// Memory store that can be told to fail batches or stop answering reads.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_apply: AtomicBool,
        hang_reads: AtomicBool,
    }

    #[async_trait]
    impl StateStore for FaultyStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            if self.hang_reads.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> anyhow::Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> anyhow::Result<bool> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> anyhow::Result<bool> {
            self.inner.exists(key).await
        }
        async fn lpop(&self, list: &str) -> anyhow::Result<Option<String>> {
            self.inner.lpop(list).await
        }
        async fn lpush(&self, list: &str, member: &str) -> anyhow::Result<()> {
            self.inner.lpush(list, member).await
        }
        async fn rpush(&self, list: &str, member: &str) -> anyhow::Result<()> {
            self.inner.rpush(list, member).await
        }
        async fn lrem(&self, list: &str, member: &str) -> anyhow::Result<usize> {
            self.inner.lrem(list, member).await
        }
        async fn llen(&self, list: &str) -> anyhow::Result<usize> {
            self.inner.llen(list).await
        }
        async fn zadd(&self, set: &str, member: &str, score: i64) -> anyhow::Result<()> {
            self.inner.zadd(set, member, score).await
        }
        async fn zrem(&self, set: &str, member: &str) -> anyhow::Result<bool> {
            self.inner.zrem(set, member).await
        }
        async fn zrange_by_score(
            &self,
            set: &str,
            min: i64,
            max: i64,
        ) -> anyhow::Result<Vec<String>> {
            self.inner.zrange_by_score(set, min, max).await
        }
        async fn zscore(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>> {
            self.inner.zscore(set, member).await
        }
        async fn zcard(&self, set: &str) -> anyhow::Result<usize> {
            self.inner.zcard(set).await
        }
        async fn apply(&self, ops: Vec<StoreOp>) -> anyhow::Result<()> {
            if self.fail_apply.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.inner.apply(ops).await
        }
        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn faulty_setup() -> (Arc<LeaseManager>, Arc<FaultyStore>) {
        let store = Arc::new(FaultyStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let manager =
            LeaseManager::with_clock(store.clone(), LeaseConfig::default(), clock);
        (Arc::new(manager), store)
    }

    #[tokio::test]
    async fn test_failed_checkout_keeps_lease_available() {
        let (manager, store) = faulty_setup();
        let first = manager.create().await.unwrap();
        let second = manager.create().await.unwrap();

        store.fail_apply.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::StoreUnavailable(_))
        ));
        store.fail_apply.store(false, Ordering::SeqCst);

        assert!(!manager.describe(&first.id).await.unwrap().is_blocked);
        // Restored at the head, ahead of the lease created after it.
        assert_eq!(queue(&store.inner).await, vec![first.id.clone(), second.id]);
        let got = manager.checkout().await.unwrap();
        assert_eq!(got.id, first.id);
        assert!(got.is_blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_after_pop_keeps_lease_available() {
        let (manager, store) = faulty_setup();
        let lease = manager.create().await.unwrap();

        store.hang_reads.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.checkout().await,
            Err(LeaseError::StoreUnavailable(_))
        ));
        store.hang_reads.store(false, Ordering::SeqCst);

        assert_eq!(manager.checkout().await.unwrap().id, lease.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_is_store_unavailable() {
        let (manager, store) = faulty_setup();
        let lease = manager.create().await.unwrap();
        store.hang_reads.store(true, Ordering::SeqCst);

        let started = tokio::time::Instant::now();
        let err = manager.describe(&lease.id).await.unwrap_err();
        assert!(matches!(err, LeaseError::StoreUnavailable(ref reason) if reason.contains("timed out")));
        assert!(started.elapsed() >= manager.config().store_timeout);
    }

    #[test]
    fn test_config_validation() {
        assert!(LeaseConfig::default().validate().is_ok());

        let too_long = LeaseConfig {
            lease_ttl: Duration::from_secs(u64::MAX / 2),
            ..LeaseConfig::default()
        };
        assert!(too_long.validate().is_err());

        let zero_marker = LeaseConfig {
            blocking_ttl: Duration::ZERO,
            ..LeaseConfig::default()
        };
        assert!(zero_marker.validate().is_err());
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_panic() {
        let (manager, _, _) = setup(LeaseConfig {
            lease_ttl: Duration::from_secs(u64::MAX / 2),
            ..LeaseConfig::default()
        });
        let lease = manager.create().await.unwrap();
        assert_eq!(
            lease.expiry,
            start() + chrono::Duration::seconds(MAX_TTL_SECS as i64)
        );
        manager.keepalive(&lease.id).await.unwrap();
    }
}
