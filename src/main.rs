//! ctlgate - multi-tenant gateway in front of per-tenant Kubernetes control planes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ctlgate_api::{shutdown_signal, start_server, AppState, BuildInfo, ServerConfig};
use ctlgate_kube::cache::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use ctlgate_kube::credentials::DEFAULT_POLL_INTERVAL;
use ctlgate_kube::{
    spawn_kubeconfig_watcher, ApiClient, CachingClient, CredentialStore, HttpApiClient,
    KubeconfigWatcher,
};

/// ctlgate - route tenant requests to the crate cluster or a managed control plane
#[derive(Parser, Debug)]
#[command(name = "ctlgate", version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "CTLGATE_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen_addr: SocketAddr,

    /// Path to the crate cluster kubeconfig
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: PathBuf,

    /// Lifetime of cached downstream results
    #[arg(long, env = "CTLGATE_CACHE_TTL_SECS", default_value_t = DEFAULT_TTL.as_secs(),
          value_parser = clap::value_parser!(u64).range(1..))]
    cache_ttl_secs: u64,

    /// Interval between sweeps of expired cache entries
    #[arg(long, env = "CTLGATE_CACHE_SWEEP_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs(),
          value_parser = clap::value_parser!(u64).range(1..))]
    cache_sweep_secs: u64,

    /// Interval between kubeconfig file checks
    #[arg(long, env = "CTLGATE_KUBECONFIG_POLL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs(),
          value_parser = clap::value_parser!(u64).range(1..))]
    kubeconfig_poll_secs: u64,

    /// Log output format
    #[arg(long, env = "CTLGATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let build = BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        sha: option_env!("CTLGATE_BUILD_SHA")
            .unwrap_or("unknown")
            .to_string(),
    };
    info!(version = %build.version, sha = %build.sha, "Starting ctlgate");

    // The crate kubeconfig must be valid at startup; later reloads are best-effort
    let credentials = CredentialStore::new();
    let mut watcher = KubeconfigWatcher::new(&cli.kubeconfig, credentials.clone());
    watcher.load_initial().await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to load crate kubeconfig {}: {}",
            cli.kubeconfig.display(),
            e
        )
    })?;
    spawn_kubeconfig_watcher(watcher, Duration::from_secs(cli.kubeconfig_poll_secs));

    let client: Arc<dyn ApiClient> = Arc::new(HttpApiClient::new());
    let cache = CachingClient::new(client.clone(), Duration::from_secs(cli.cache_ttl_secs));
    cache.spawn_sweeper(Duration::from_secs(cli.cache_sweep_secs));
    let cached: Arc<dyn ApiClient> = Arc::new(cache);

    let state = AppState::new(credentials, client, cached, build);
    let config = ServerConfig {
        addr: cli.listen_addr,
    };

    start_server(config, state, shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server failed: {}", e))?;

    Ok(())
}
