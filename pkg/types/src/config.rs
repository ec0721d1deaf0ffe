use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which store backend the server talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Redis,
    /// In-process store; state is lost on restart.
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!(
                "unknown store backend '{}' (expected 'redis' or 'memory')",
                other
            )),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Redis => write!(f, "redis"),
            StoreKind::Memory => write!(f, "memory"),
        }
    }
}

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 5000
/// store: redis
/// redis-host: 10.0.0.5
/// redis-port: 6379
/// lease-ttl-secs: 300
/// blocking-ttl-secs: 30
/// sweep-interval-secs: 5
/// store-timeout-ms: 2000
/// requeue-on-release: false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub store: Option<StoreKind>,
    #[serde(default, alias = "redis-host")]
    pub redis_host: Option<String>,
    #[serde(default, alias = "redis-port")]
    pub redis_port: Option<u16>,
    #[serde(default, alias = "lease-ttl-secs")]
    pub lease_ttl_secs: Option<u64>,
    #[serde(default, alias = "blocking-ttl-secs")]
    pub blocking_ttl_secs: Option<u64>,
    #[serde(default, alias = "sweep-interval-secs")]
    pub sweep_interval_secs: Option<u64>,
    #[serde(default, alias = "store-timeout-ms")]
    pub store_timeout_ms: Option<u64>,
    #[serde(default, alias = "requeue-on-release")]
    pub requeue_on_release: Option<bool>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
