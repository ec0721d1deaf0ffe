//! Lease lifecycle: create, checkout, release, keepalive, describe, delete.
//!
//! [`LeaseManager`] is the only writer of the three store structures that
//! describe the lease pool: the record map, the availability queue and the
//! expiry index. Every multi-key update is submitted as one atomic batch and
//! every read-modify-write on an id runs inside that id's critical section.

pub mod clock;
pub mod error;
pub mod locks;
pub mod manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LeaseError, LeaseResult};
pub use manager::{LeaseConfig, LeaseManager, PoolStats};
