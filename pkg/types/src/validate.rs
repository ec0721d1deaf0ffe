use anyhow::{Result, bail};
use pkg_constants::state::{AVAILABLE_QUEUE_KEY, BLOCKING_MARKER_PREFIX, EXPIRY_INDEX_KEY};

/// Longest id accepted from callers. Generated ids are 36-char UUIDs.
const MAX_LEASE_ID_LEN: usize = 128;

/// Validate a caller-supplied lease id before it is used as a store key.
/// Rules: non-empty, at most 128 chars, printable ASCII without whitespace,
/// and never one of the allocator's own bookkeeping keys.
pub fn validate_lease_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("lease id must not be empty");
    }
    if id.len() > MAX_LEASE_ID_LEN {
        bail!(
            "lease id exceeds {} characters (got {})",
            MAX_LEASE_ID_LEN,
            id.len()
        );
    }
    if !id.chars().all(|c| c.is_ascii_graphic()) {
        bail!("lease id '{}' must contain only printable ASCII characters", id);
    }
    if id == AVAILABLE_QUEUE_KEY || id == EXPIRY_INDEX_KEY || id.starts_with(BLOCKING_MARKER_PREFIX)
    {
        bail!("lease id '{}' collides with a reserved store key", id);
    }
    Ok(())
}
