use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

/// Metric names exported by the lease server.
pub mod names {
    pub const LEASES_CREATED: &str = "lease_created_total";
    pub const LEASES_CHECKED_OUT: &str = "lease_checkouts_total";
    pub const CHECKOUTS_EMPTY: &str = "lease_checkouts_empty_total";
    pub const LEASES_RELEASED: &str = "lease_released_total";
    pub const KEEPALIVES: &str = "lease_keepalives_total";
    pub const LEASES_DELETED: &str = "lease_deleted_total";
    pub const LEASES_RECLAIMED: &str = "lease_reclaimed_total";
    pub const SWEEP_FAILURES: &str = "lease_sweep_failures_total";
    pub const STORE_ERRORS: &str = "lease_store_errors_total";
    pub const LEASES: &str = "lease_pool_leases";
    pub const LEASES_AVAILABLE: &str = "lease_pool_available";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

struct Metric {
    kind: MetricKind,
    help: &'static str,
    value: AtomicI64,
}

/// Thread-safe registry of unlabelled counters and gauges, rendered in the
/// Prometheus text exposition format. Updates to unregistered names are ignored.
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: RwLock<BTreeMap<&'static str, Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every lease metric in [`names`] registered.
    pub fn for_leases() -> Self {
        let registry = Self::new();
        let counters = [
            (names::LEASES_CREATED, "Leases created"),
            (names::LEASES_CHECKED_OUT, "Successful checkouts"),
            (names::CHECKOUTS_EMPTY, "Checkouts that found no available lease"),
            (names::LEASES_RELEASED, "Leases released"),
            (names::KEEPALIVES, "Keepalives accepted"),
            (names::LEASES_DELETED, "Leases deleted on request"),
            (names::LEASES_RECLAIMED, "Expired leases reclaimed by the sweeper"),
            (names::SWEEP_FAILURES, "Sweeper deletions that failed"),
            (names::STORE_ERRORS, "Requests that failed on the store"),
        ];
        for (name, help) in counters {
            registry.register(name, MetricKind::Counter, help);
        }
        registry.register(names::LEASES, MetricKind::Gauge, "Leases in the expiry index");
        registry.register(
            names::LEASES_AVAILABLE,
            MetricKind::Gauge,
            "Lease ids waiting in the availability queue",
        );
        registry
    }

    /// Register a metric. Re-registering an existing name is a no-op.
    pub fn register(&self, name: &'static str, kind: MetricKind, help: &'static str) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.entry(name).or_insert_with(|| Metric {
            kind,
            help,
            value: AtomicI64::new(0),
        });
    }

    fn with<F: FnOnce(&Metric)>(&self, name: &str, f: F) {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        if let Some(metric) = metrics.get(name) {
            f(metric);
        }
    }

    pub fn inc(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, val: u64) {
        self.with(name, |m| {
            m.value.fetch_add(val as i64, Ordering::Relaxed);
        });
    }

    /// Set a gauge. Counters only move forward and ignore this.
    pub fn set(&self, name: &str, val: i64) {
        self.with(name, |m| {
            if m.kind == MetricKind::Gauge {
                m.value.store(val, Ordering::Relaxed);
            }
        });
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics.get(name).map(|m| m.value.load(Ordering::Relaxed))
    }

    pub fn render(&self) -> String {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        let mut output = String::new();
        for (name, metric) in metrics.iter() {
            let _ = writeln!(output, "# HELP {} {}", name, metric.help);
            let _ = writeln!(output, "# TYPE {} {}", name, metric.kind.as_str());
            let _ = writeln!(output, "{} {}", name, metric.value.load(Ordering::Relaxed));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let registry = MetricsRegistry::for_leases();
        registry.inc(names::LEASES_CREATED);
        registry.add(names::LEASES_CREATED, 2);
        registry.set(names::LEASES_AVAILABLE, 7);
        registry.set(names::LEASES_CREATED, 0);
        registry.inc("not_registered");

        assert_eq!(registry.get(names::LEASES_CREATED), Some(3));
        assert_eq!(registry.get(names::LEASES_AVAILABLE), Some(7));
        assert_eq!(registry.get("not_registered"), None);
    }

    #[test]
    fn test_render_exposition_format() {
        let registry = MetricsRegistry::new();
        registry.register("b_total", MetricKind::Counter, "B things");
        registry.register("a_level", MetricKind::Gauge, "A level");
        registry.inc("b_total");
        registry.set("a_level", -2);

        assert_eq!(
            registry.render(),
            "# HELP a_level A level\n# TYPE a_level gauge\na_level -2\n\
             # HELP b_total B things\n# TYPE b_total counter\nb_total 1\n"
        );
    }
}
