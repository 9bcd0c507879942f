//! Control-plane credential resolution
//!
//! A tenant control plane is addressed by (project, workspace, name). Its
//! kubeconfig lives in a secret on the crate cluster, referenced from the
//! `ManagedControlPlane` status:
//!
//! ```text
//! ManagedControlPlane.status.components.authentication.access
//!   -> Secret {namespace}/{name}, data[key]
//!     -> ConnectionProfile
//! ```

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use serde::Deserialize;
use tracing::debug;

use crate::client::{get_json, ApiClient, ApiRequest};
use crate::error::{Error, Result};
use crate::profile::ConnectionProfile;

/// Tenant coordinates identifying one managed control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCoordinates {
    /// Project name
    pub project: String,
    /// Workspace name
    pub workspace: String,
    /// Control plane name
    pub control_plane: String,
}

impl TenantCoordinates {
    /// Namespace holding the control plane on the crate cluster
    pub fn namespace(&self) -> String {
        format!("project-{}--ws-{}", self.project, self.workspace)
    }

    /// Path of the `ManagedControlPlane` resource
    pub fn control_plane_path(&self) -> String {
        format!(
            "/apis/core.openmcp.cloud/v1alpha1/namespaces/{}/managedcontrolplanes/{}",
            self.namespace(),
            self.control_plane
        )
    }
}

/// The parts of a `ManagedControlPlane` the resolver reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManagedControlPlane {
    /// Observed status
    #[serde(default)]
    pub status: ControlPlaneStatus,
}

/// Control plane status
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlPlaneStatus {
    /// Component status
    #[serde(default)]
    pub components: ControlPlaneComponents,
}

/// Control plane component status
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlPlaneComponents {
    /// Authentication component
    #[serde(default)]
    pub authentication: AuthenticationStatus,
}

/// Authentication component status
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthenticationStatus {
    /// Reference to the access kubeconfig
    #[serde(default)]
    pub access: SecretKeyReference,
}

/// Reference to one key of a secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecretKeyReference {
    /// Secret name
    #[serde(default)]
    pub name: String,
    /// Secret namespace
    #[serde(default)]
    pub namespace: String,
    /// Data key holding the kubeconfig
    #[serde(default)]
    pub key: String,
}

impl SecretKeyReference {
    fn secret_path(&self) -> String {
        format!("/api/v1/namespaces/{}/secrets/{}", self.namespace, self.name)
    }
}

/// Turns tenant coordinates into a control-plane connection profile
#[derive(Clone)]
pub struct ControlPlaneResolver {
    client: Arc<dyn ApiClient>,
}

impl ControlPlaneResolver {
    /// Create a resolver issuing its lookups through `client`
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    /// Resolve the control plane's connection profile
    ///
    /// Both lookups run against the crate cluster as `crate_token`. The returned
    /// profile still carries the secret's own credentials; callers replace them
    /// with the tenant's control-plane token.
    pub async fn resolve(
        &self,
        coordinates: &TenantCoordinates,
        crate_token: &str,
        crate_profile: &ConnectionProfile,
    ) -> Result<ConnectionProfile> {
        let mut crate_profile = crate_profile.clone();
        crate_profile.set_user_token(crate_token);

        let control_plane: ManagedControlPlane = get_json(
            self.client.as_ref(),
            ApiRequest::get(coordinates.control_plane_path()),
            &crate_profile,
        )
        .await?;

        let access = control_plane.status.components.authentication.access;
        if access.key.is_empty() {
            return Err(Error::ControlPlane(
                "control-plane authentication key is empty".into(),
            ));
        }

        debug!(
            namespace = %access.namespace,
            secret = %access.name,
            "Fetching control-plane access secret"
        );

        let secret: Secret = get_json(
            self.client.as_ref(),
            ApiRequest::get(access.secret_path()),
            &crate_profile,
        )
        .await?;

        let payload = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&access.key))
            .map(|bytes| bytes.0.as_slice())
            .unwrap_or_default();
        if payload.is_empty() {
            return Err(Error::ControlPlane(
                "control-plane kubeconfig data is empty".into(),
            ));
        }

        let content = std::str::from_utf8(payload).map_err(|e| {
            Error::InvalidProfile(format!("control-plane kubeconfig is not utf-8: {}", e))
        })?;
        ConnectionProfile::parse_validated(content)
    }
}
