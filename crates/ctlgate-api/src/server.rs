//! Gateway server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{any, get};
use axum::Router;
use ctlgate_kube::{ApiClient, ControlPlaneResolver, CredentialStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::cors::cors;
use crate::error::Error;
use crate::handlers::{
    btp_service_operator_handler, category_handler, category_header_handler, kubeconfig_handler,
    managed_handler, passthrough_handler, version_handler,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
}

/// Version information served at `/version`
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    /// Release version
    pub version: String,
    /// Source commit
    pub sha: String,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Crate-cluster profile
    pub credentials: CredentialStore,
    /// Control-plane resolution, backed by the caching client
    pub resolver: ControlPlaneResolver,
    /// Client for forwarded requests and collection fetches
    pub client: Arc<dyn ApiClient>,
    /// Client for category discovery
    pub discovery: Arc<dyn ApiClient>,
    /// Build information
    pub build: BuildInfo,
}

impl AppState {
    /// Wire the handlers to their clients
    ///
    /// `client` serves tenant traffic directly; `cached` backs control-plane
    /// resolution and category discovery.
    pub fn new(
        credentials: CredentialStore,
        client: Arc<dyn ApiClient>,
        cached: Arc<dyn ApiClient>,
        build: BuildInfo,
    ) -> Self {
        Self {
            credentials,
            resolver: ControlPlaneResolver::new(cached.clone()),
            client,
            discovery: cached,
            build,
        }
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/openmcp/kubeconfig", any(kubeconfig_handler))
        .route("/version", get(version_handler))
        .route("/btp-so", any(btp_service_operator_handler))
        .route("/managed", any(managed_handler))
        .route("/c", any(category_header_handler))
        .route("/c/", any(category_header_handler))
        .route("/c/{*category}", any(category_handler))
        // Everything else is forwarded as-is
        .fallback(passthrough_handler)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_server<F>(config: ServerConfig, state: AppState, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind {}: {}", config.addr, e)))?;

    info!(addr = %config.addr, "Starting gateway server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("server error: {}", e)))?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
