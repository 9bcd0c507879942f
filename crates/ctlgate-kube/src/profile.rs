//! Connection profiles
//!
//! A `ConnectionProfile` is the kubeconfig subset the gateway needs to issue one
//! authenticated API call: cluster endpoints and user credentials. The crate
//! cluster profile is read from disk; control-plane profiles are decoded from
//! secrets on the crate cluster.
//!
//! Only the first cluster and the first user are ever used for outbound calls.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kubeconfig-shaped connection profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// API version (usually "v1")
    #[serde(rename = "apiVersion", default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// Kind (usually "Config")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Cluster endpoints
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    /// User credentials
    #[serde(default)]
    pub users: Vec<NamedUser>,
    /// Contexts binding clusters to users
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    /// Selected context
    #[serde(
        rename = "current-context",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub current_context: String,
}

/// Named cluster entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Cluster name
    #[serde(default)]
    pub name: String,
    /// Cluster endpoint
    #[serde(default)]
    pub cluster: ClusterEndpoint,
}

/// API server endpoint and its trust material
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEndpoint {
    /// API server URL
    #[serde(default)]
    pub server: String,
    /// Skip server certificate verification
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_tls_verify: bool,
    /// CA certificate bundle (base64 encoded PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// Named user entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    /// User name
    #[serde(default)]
    pub name: String,
    /// User credential
    #[serde(default)]
    pub user: UserCredential,
}

/// Credential material for one user
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserCredential {
    /// Client certificate (base64 encoded PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// Client private key (base64 encoded PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Basic auth username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Exec credential plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credential values never appear in logs
        f.debug_struct("UserCredential")
            .field("client_certificate_data", &redacted(&self.client_certificate_data))
            .field("client_key_data", &redacted(&self.client_key_data))
            .field("token", &redacted(&self.token))
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("exec", &self.exec)
            .finish()
    }
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

/// Exec credential plugin configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// API version
    #[serde(default)]
    pub api_version: String,
    /// Command to run
    #[serde(default)]
    pub command: String,
    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Named context entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Context name
    #[serde(default)]
    pub name: String,
    /// Context config
    #[serde(default)]
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    #[serde(default)]
    pub cluster: String,
    /// User name (reference)
    #[serde(default)]
    pub user: String,
    /// Default namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ConnectionProfile {
    /// Parse a kubeconfig YAML (or JSON) document without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::InvalidProfile(format!("failed to parse kubeconfig: {}", e)))
    }

    /// Parse a kubeconfig document and require at least one cluster and one user
    pub fn parse_validated(content: &str) -> Result<Self> {
        let profile = Self::from_yaml(content)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }

    /// Require at least one cluster and one user entry
    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            return Err(Error::InvalidProfile(".clusters is empty".into()));
        }
        if self.users.is_empty() {
            return Err(Error::InvalidProfile(".users is empty".into()));
        }
        Ok(())
    }

    /// The cluster endpoint used for outbound calls
    pub fn primary_cluster(&self) -> Result<&ClusterEndpoint> {
        self.clusters
            .first()
            .map(|c| &c.cluster)
            .ok_or_else(|| Error::InvalidProfile("empty clusters".into()))
    }

    /// The user credential used for outbound calls
    pub fn primary_user(&self) -> Result<&UserCredential> {
        self.users
            .first()
            .map(|u| &u.user)
            .ok_or_else(|| Error::InvalidProfile("empty users".into()))
    }

    /// Replace every user credential with a bearer token
    ///
    /// Certificate, key, username and password material is cleared on every
    /// entry so a stale client certificate is never sent next to the new token.
    /// A profile without users gets a single token-only entry.
    pub fn set_user_token(&mut self, token: &str) {
        if self.users.is_empty() {
            self.users.push(NamedUser {
                name: "default".into(),
                user: UserCredential {
                    token: Some(token.to_string()),
                    ..Default::default()
                },
            });
            return;
        }

        for entry in &mut self.users {
            entry.user.client_certificate_data = None;
            entry.user.client_key_data = None;
            entry.user.username = None;
            entry.user.password = None;
            entry.user.token = Some(token.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: crate
    cluster:
      server: https://crate.example.com
      certificate-authority-data: Q0EtREFUQQ==
users:
  - name: admin
    user:
      client-certificate-data: Q0VSVA==
      client-key-data: S0VZ
      username: admin
      password: hunter2
  - name: second
    user:
      token: old-token
contexts:
  - name: crate
    context:
      cluster: crate
      user: admin
current-context: crate
"#;

    #[test]
    fn test_parse_kubeconfig() {
        let profile = ConnectionProfile::parse_validated(KUBECONFIG).unwrap();

        assert_eq!(profile.clusters.len(), 1);
        assert_eq!(profile.users.len(), 2);
        assert_eq!(profile.current_context, "crate");

        let cluster = profile.primary_cluster().unwrap();
        assert_eq!(cluster.server, "https://crate.example.com");
        assert_eq!(
            cluster.certificate_authority_data.as_deref(),
            Some("Q0EtREFUQQ==")
        );
        assert!(!cluster.insecure_skip_tls_verify);
    }

    #[test]
    fn test_set_user_token_clears_all_credential_material() {
        let mut profile = ConnectionProfile::parse_validated(KUBECONFIG).unwrap();

        profile.set_user_token("fresh-token");

        assert_eq!(profile.users.len(), 2);
        for entry in &profile.users {
            assert_eq!(entry.user.token.as_deref(), Some("fresh-token"));
            assert!(entry.user.client_certificate_data.is_none());
            assert!(entry.user.client_key_data.is_none());
            assert!(entry.user.username.is_none());
            assert!(entry.user.password.is_none());
        }
        // Names survive the overwrite
        assert_eq!(profile.users[0].name, "admin");
    }

    #[test]
    fn test_set_user_token_on_empty_users_adds_default_entry() {
        let mut profile = ConnectionProfile::default();

        profile.set_user_token("t");

        assert_eq!(profile.users.len(), 1);
        assert_eq!(profile.users[0].name, "default");
        assert_eq!(profile.users[0].user.token.as_deref(), Some("t"));
    }

    #[test]
    fn test_validate_rejects_missing_clusters() {
        let profile = ConnectionProfile::from_yaml("users:\n  - name: u\n    user: {}\n").unwrap();
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains(".clusters is empty"));
    }

    #[test]
    fn test_validate_rejects_missing_users() {
        let profile = ConnectionProfile::from_yaml(
            "clusters:\n  - name: c\n    cluster:\n      server: https://x\n",
        )
        .unwrap();
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains(".users is empty"));
    }

    #[test]
    fn test_from_yaml_rejects_garbage() {
        let result = ConnectionProfile::from_yaml("clusters: [this is: not: valid");
        assert!(matches!(result, Err(Error::InvalidProfile(_))));
    }

    #[test]
    fn test_primary_entries_on_empty_profile() {
        let profile = ConnectionProfile::default();
        assert!(profile.primary_cluster().is_err());
        assert!(profile.primary_user().is_err());
    }

    #[test]
    fn test_to_yaml_uses_kubeconfig_field_names() {
        let profile = ConnectionProfile::parse_validated(KUBECONFIG).unwrap();
        let yaml = profile.to_yaml().unwrap();

        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("certificate-authority-data: Q0EtREFUQQ=="));
        assert!(yaml.contains("client-certificate-data: Q0VSVA=="));
        assert!(yaml.contains("current-context: crate"));
        assert!(!yaml.contains("insecure-skip-tls-verify"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let profile = ConnectionProfile::parse_validated(KUBECONFIG).unwrap();
        let rendered = format!("{:?}", profile);

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("old-token"));
        assert!(!rendered.contains("Q0VSVA=="));
        assert!(rendered.contains("<redacted>"));
    }
}
