//! Store key layout.
//!
//! A lease record lives under its bare id; the shared structures below
//! hold ids only.

/// List of lease ids that can be checked out, consumed FIFO.
pub const AVAILABLE_QUEUE_KEY: &str = "available_keys";

/// Sorted set of lease ids scored by expiry (epoch millis).
pub const EXPIRY_INDEX_KEY: &str = "expiry";

/// Prefix of the short-lived marker written while a lease is checked out.
pub const BLOCKING_MARKER_PREFIX: &str = "blocking:";

/// Key of the blocking marker for `id`.
pub fn blocking_marker_key(id: &str) -> String {
    format!("{}{}", BLOCKING_MARKER_PREFIX, id)
}
