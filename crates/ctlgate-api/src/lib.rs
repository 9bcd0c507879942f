//! HTTP gateway for ctlgate
//!
//! Routes tenant requests to the crate cluster or a per-tenant control plane:
//!
//! ```text
//! request ──► cors ──► handler ──► TenantContext ──► profile ──► ApiClient ──► transform ──► response
//!                                  (headers, auth)   (crate or MCP)               (jq / JSONPath)
//! ```
//!
//! - [`context`] - tenant header extraction and validation
//! - [`handlers`] - pass-through, category, BTP, well-known and version handlers
//! - [`aggregate`] - multi-collection JSON array aggregation
//! - [`transform`] - jq and JSONPath response transformation
//! - [`response`] - relaying upstream responses
//! - [`error`] - error taxonomy rendered as Kubernetes `Status` bodies
//! - [`server`] - router, shared state and serving

#![warn(missing_docs)]

pub mod aggregate;
pub mod context;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod response;
pub mod server;
pub mod transform;

pub use error::{Error, Result};
pub use server::{router, shutdown_signal, start_server, AppState, BuildInfo, ServerConfig};
