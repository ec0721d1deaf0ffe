//! Network-related constants.

/// Default port for the lease API server.
pub const DEFAULT_API_PORT: u16 = 5000;

/// Default Redis host.
pub const DEFAULT_REDIS_HOST: &str = "localhost";

/// Default Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;
