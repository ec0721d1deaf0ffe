use thiserror::Error;

pub type LeaseResult<T> = Result<T, LeaseError>;

/// Failures surfaced by [`crate::LeaseManager`]. None of them is fatal to the
/// process; each one is scoped to a single request or sweep item.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The id is unknown, already reclaimed, or not a valid lease id.
    #[error("lease {0} not found")]
    NotFound(String),

    /// The availability queue holds no live lease.
    #[error("no available leases")]
    NoneAvailable,

    /// A stored record could not be decoded.
    #[error("malformed lease record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    /// The store failed or did not answer in time.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LeaseError {
    /// Caller-facing view: a malformed record is indistinguishable from a missing one.
    pub fn into_public(self) -> Self {
        match self {
            LeaseError::MalformedRecord { id, .. } => LeaseError::NotFound(id),
            other => other,
        }
    }
}
