use chrono::{DateTime, Utc};
use pkg_constants::lease::DEFAULT_SWEEP_INTERVAL_SECS;
use pkg_leases::{LeaseError, LeaseManager};
use pkg_metrics::{MetricsRegistry, names};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids whose expiry had passed.
    pub expired: usize,
    /// Deleted by this pass.
    pub reclaimed: usize,
    /// Kept alive between the scan and the delete; left in place.
    pub renewed: usize,
    /// Already gone when the sweeper got to them.
    pub vanished: usize,
    /// Left for the next pass.
    pub failed: usize,
}

/// Background controller that deletes leases whose expiry has passed,
/// whether or not they are checked out.
pub struct ExpirySweeper {
    manager: Arc<LeaseManager>,
    metrics: Arc<MetricsRegistry>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(manager: Arc<LeaseManager>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            manager,
            metrics,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the sweep loop as a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ExpirySweeper started (interval={}ms)",
                self.interval.as_millis()
            );
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now = self.manager.now();
                if let Err(e) = self.sweep_once(now).await {
                    warn!("ExpirySweeper scan error: {}", e);
                }
            }
        })
    }

    /// One pass: delete every lease indexed with expiry at or before `now`.
    ///
    /// Each id is re-checked inside its critical section, so a lease kept
    /// alive after the scan survives. A failure on one id is logged and the pass moves on; the id stays in
    /// the index and is retried on the next tick.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, LeaseError> {
        let expired = self.manager.expired(now).await?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }

        for id in &expired {
            match self.manager.reclaim_expired(id, now).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => report.renewed += 1,
                Err(LeaseError::NotFound(_)) => {
                    debug!("Expired lease {} was already gone", id);
                    report.vanished += 1;
                }
                Err(e) => {
                    warn!("Failed to reclaim expired lease {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        self.metrics
            .add(names::LEASES_RECLAIMED, report.reclaimed as u64);
        self.metrics.add(names::SWEEP_FAILURES, report.failed as u64);
        info!(
            "Swept {} expired leases (reclaimed={}, renewed={}, vanished={}, failed={})",
            report.expired, report.reclaimed, report.renewed, report.vanished, report.failed
        );
        Ok(report)
    }
}
