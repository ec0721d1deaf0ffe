use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::lease::{
    DEFAULT_BLOCKING_TTL_SECS, DEFAULT_LEASE_TTL_SECS, DEFAULT_REQUEUE_ON_RELEASE,
    DEFAULT_STORE_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use pkg_constants::network::{DEFAULT_API_PORT, DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT};
use pkg_constants::paths::DEFAULT_SERVER_CONFIG;
use pkg_leases::LeaseConfig;
use pkg_types::config::{ServerConfigFile, StoreKind, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Default)]
#[command(name = "lease-server", about = "Short-lived lease allocator")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, env = "LEASE_CONFIG", default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Store backend: redis or memory
    #[arg(long, env = "LEASE_STORE")]
    store: Option<StoreKind>,

    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT")]
    redis_port: Option<u16>,

    /// Lifetime granted by create and keepalive
    #[arg(long, env = "LEASE_TTL_SECS")]
    lease_ttl_secs: Option<u64>,

    /// Lifetime of the blocking marker written on checkout
    #[arg(long, env = "BLOCKING_TTL_SECS")]
    blocking_ttl_secs: Option<u64>,

    /// Seconds between expiry sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Timeout for each store call
    #[arg(long, env = "STORE_TIMEOUT_MS")]
    store_timeout_ms: Option<u64>,

    /// Return released leases to the availability queue
    #[arg(long, env = "REQUEUE_ON_RELEASE")]
    requeue_on_release: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Merge: CLI args / env > config file > defaults
fn resolve(cli: Cli, file_cfg: ServerConfigFile) -> anyhow::Result<ServerConfig> {
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_API_PORT);
    let lease = LeaseConfig {
        lease_ttl: Duration::from_secs(
            cli.lease_ttl_secs
                .or(file_cfg.lease_ttl_secs)
                .unwrap_or(DEFAULT_LEASE_TTL_SECS),
        ),
        blocking_ttl: Duration::from_secs(
            cli.blocking_ttl_secs
                .or(file_cfg.blocking_ttl_secs)
                .unwrap_or(DEFAULT_BLOCKING_TTL_SECS),
        ),
        store_timeout: Duration::from_millis(
            cli.store_timeout_ms
                .or(file_cfg.store_timeout_ms)
                .unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
        ),
        requeue_on_release: cli
            .requeue_on_release
            .or(file_cfg.requeue_on_release)
            .unwrap_or(DEFAULT_REQUEUE_ON_RELEASE),
    };
    lease.validate()?;
    let sweep_interval = Duration::from_secs(
        cli.sweep_interval_secs
            .or(file_cfg.sweep_interval_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
            .max(1),
    );

    Ok(ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        store: cli.store.or(file_cfg.store).unwrap_or_default(),
        redis_host: cli
            .redis_host
            .or(file_cfg.redis_host)
            .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
        redis_port: cli
            .redis_port
            .or(file_cfg.redis_port)
            .unwrap_or(DEFAULT_REDIS_PORT),
        lease,
        sweep_interval,
    })
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    let config = resolve(cli, file_cfg)?;

    info!("Starting lease-server");
    info!("  Listen:          {}", config.addr);
    info!("  Store:           {}", config.store);
    if config.store == StoreKind::Redis {
        info!("  Redis:           {}:{}", config.redis_host, config.redis_port);
    }
    info!("  Lease TTL:       {}s", config.lease.lease_ttl.as_secs());
    info!("  Blocking TTL:    {}s", config.lease.blocking_ttl.as_secs());
    info!("  Sweep interval:  {}s", config.sweep_interval.as_secs());
    info!("  Requeue release: {}", config.lease.requeue_on_release);

    start_server(config).await?;

    Ok(())
}
