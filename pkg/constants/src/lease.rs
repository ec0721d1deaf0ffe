//! Lease lifecycle defaults.

/// How long a freshly created (or kept-alive) lease lives, in seconds.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 300;

/// TTL of the `blocking:<id>` marker written on checkout, in seconds.
pub const DEFAULT_BLOCKING_TTL_SECS: u64 = 30;

/// Longest lease or marker lifetime accepted from configuration, in seconds.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Interval between expiry sweeps, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Upper bound on a single store round-trip, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// Released leases go back into the availability queue only when enabled.
pub const DEFAULT_REQUEUE_ON_RELEASE: bool = false;
