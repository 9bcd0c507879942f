//! Downstream API client
//!
//! Issues a single request against the first cluster of a connection profile.
//! TLS is configured per call from the profile: a custom trust root when CA data
//! is present, a client certificate when the user carries one, default roots and
//! no mutual TLS otherwise.
//!
//! # Dependency Injection
//!
//! Handlers and the cache depend on the `ApiClient` trait, never on the reqwest
//! implementation, so tests can inject a mock and the cache can wrap any client.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::discovery::{self, ApiGroupDiscovery};
use crate::error::{Error, Result};
use crate::profile::{ClusterEndpoint, ConnectionProfile, UserCredential};

/// Default content type for API requests
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Longest upstream body echoed back in a status error
const MAX_ERROR_BODY: usize = 512;

/// A request to a downstream API server
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// API path (e.g. /api/v1/pods)
    pub path: String,
    /// Query parameters in the order received
    pub query: Vec<(String, String)>,
    /// Headers to forward
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl ApiRequest {
    /// Create a request with no query, headers or body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Set a header, replacing any existing value
    pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A fully buffered response from a downstream API server
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl RawResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the status signals a client or server error
    pub fn is_error(&self) -> bool {
        self.status.as_u16() >= 400
    }
}

/// Capability to talk to a Kubernetes-style API server
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send one request using the profile's first cluster and first user
    async fn send(&self, request: ApiRequest, profile: &ConnectionProfile)
        -> Result<RawResponse>;

    /// Discover API groups whose resources declare the given category
    async fn discover_by_category(
        &self,
        profile: &ConnectionProfile,
        category: &str,
    ) -> Result<Vec<ApiGroupDiscovery>>;
}

/// Send a request and decode a successful JSON response
pub async fn get_json<T, C>(client: &C, request: ApiRequest, profile: &ConnectionProfile) -> Result<T>
where
    T: DeserializeOwned,
    C: ApiClient + ?Sized,
{
    let mut request = request;
    request
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

    let response = client.send(request, profile).await?;
    if !response.is_success() {
        return Err(Error::Status {
            code: response.status.as_u16(),
            message: truncate_body(&response.body),
        });
    }

    serde_json::from_slice(&response.body)
        .map_err(|e| Error::Decode(format!("failed to decode json response: {}", e)))
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_ERROR_BODY).collect()
}

/// `ApiClient` backed by reqwest, building a TLS client per call
#[derive(Clone, Default)]
pub struct HttpApiClient;

impl HttpApiClient {
    /// Create a new client
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn send(
        &self,
        request: ApiRequest,
        profile: &ConnectionProfile,
    ) -> Result<RawResponse> {
        let cluster = profile.primary_cluster()?;
        let user = profile.primary_user()?;

        let client = build_http_client(cluster, user)?;
        let url = build_url(&cluster.server, &request.path, &request.query)?;
        let headers = outbound_headers(request.headers, user)?;

        debug!(
            method = %request.method,
            host = %cluster.server,
            path = %request.path,
            "Requesting api server"
        );

        let mut builder = client.request(request.method, url).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("failed to request api server: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        // Always drain the body so the connection is released
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read api server response: {}", e)))?;

        debug!(status = %status, body_len = body.len(), "Received api server response");

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    async fn discover_by_category(
        &self,
        profile: &ConnectionProfile,
        category: &str,
    ) -> Result<Vec<ApiGroupDiscovery>> {
        let groups = discovery::fetch_groups(self, profile).await?;
        Ok(discovery::filter_by_category(groups, category))
    }
}

/// Build a reqwest client carrying the profile's TLS material
fn build_http_client(cluster: &ClusterEndpoint, user: &UserCredential) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().use_rustls_tls();

    if let Some(ca_data) = non_empty(&cluster.certificate_authority_data) {
        let pem = decode_base64(ca_data, "CA certificate")?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem)
            .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(Error::Tls("CA certificate data contains no certificates".into()));
        }
        builder = builder.tls_built_in_root_certs(false);
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if cluster.insecure_skip_tls_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(cert_data) = non_empty(&user.client_certificate_data) {
        let mut pem = decode_base64(cert_data, "client certificate")?;
        let key = decode_base64(
            user.client_key_data.as_deref().unwrap_or_default(),
            "client key",
        )?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);

        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| Error::Tls(format!("failed to load client key pair: {}", e)))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| Error::Tls(format!("failed to create HTTP client: {}", e)))
}

/// Join the server URL with an API path and attach query parameters
pub(crate) fn build_url(
    server: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<reqwest::Url> {
    let joined = format!(
        "{}/{}",
        server.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = reqwest::Url::parse(&joined)
        .map_err(|e| Error::Request(format!("failed to parse url {}: {}", joined, e)))?;

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter());
    }

    Ok(url)
}

/// Apply the profile's credential to the forwarded headers
///
/// A forwarded `Authorization` value never reaches the API server; the
/// profile's token (or basic auth) replaces it.
fn outbound_headers(mut headers: HeaderMap, user: &UserCredential) -> Result<HeaderMap> {
    headers.remove(AUTHORIZATION);

    let credential = if let Some(token) = non_empty(&user.token) {
        Some(format!("Bearer {}", token))
    } else {
        non_empty(&user.username).map(|username| {
            let password = user.password.as_deref().unwrap_or_default();
            format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
        })
    };

    if let Some(credential) = credential {
        let mut value = HeaderValue::from_str(&credential)
            .map_err(|e| Error::Request(format!("invalid credential header: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
    }

    Ok(headers)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn decode_base64(data: &str, what: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Tls(format!("failed to decode {} data: {}", what, e)))
}
