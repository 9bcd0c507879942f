//! Downstream cluster access for ctlgate
//!
//! Everything the gateway needs to talk to Kubernetes-style API servers on
//! behalf of a tenant:
//!
//! ```text
//! CredentialStore ──► ControlPlaneResolver ──► ApiClient (CachingClient ─► HttpApiClient)
//!  (crate profile)     (MCP -> Secret -> profile)          (TTL cache)      (reqwest, per-call TLS)
//! ```
//!
//! - [`profile`] - kubeconfig-shaped connection profiles
//! - [`client`] - the `ApiClient` trait and its reqwest implementation
//! - [`discovery`] - aggregated discovery and category filtering
//! - [`cache`] - TTL response cache wrapping any `ApiClient`
//! - [`controlplane`] - tenant coordinates to control-plane profile
//! - [`credentials`] - crate-cluster profile store and file watcher

#![warn(missing_docs)]

pub mod cache;
pub mod client;
pub mod controlplane;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod profile;

pub use cache::CachingClient;
#[cfg(any(test, feature = "mock"))]
pub use client::MockApiClient;
pub use client::{get_json, ApiClient, ApiRequest, HttpApiClient, RawResponse};
pub use controlplane::{ControlPlaneResolver, TenantCoordinates};
pub use credentials::{load_profile_file, spawn_kubeconfig_watcher, CredentialStore, KubeconfigWatcher};
pub use discovery::{ApiGroupDiscovery, CategoryResource};
pub use error::{Error, Result};
pub use profile::ConnectionProfile;
