//! Tenant context extraction
//!
//! Turns an inbound request into a `TenantContext`: which cluster to talk to,
//! with which tokens, what to forward and how to reshape the answer.
//!
//! # Security
//!
//! Plumbing headers (tenant coordinates, credential material, transformation
//! options, Host, User-Agent and the inbound Authorization value) are always
//! stripped from the forwarded header set. The downstream client sets its own
//! Authorization from the resolved profile.

use axum::extract::Query;
use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use ctlgate_kube::TenantCoordinates;

use crate::error::{Error, Result};
use crate::transform::Transformation;

// ============================================================================
// Header Names
// ============================================================================

/// `<crateToken>[,<controlPlaneToken>]`
pub const AUTHORIZATION_HEADER: &str = "Authorization";
/// Control-plane token used when Authorization carries only one segment
pub const MCP_AUTHORIZATION_HEADER: &str = "X-mcp-authorization";
/// Project name
pub const PROJECT_HEADER: &str = "X-project";
/// Workspace name
pub const WORKSPACE_HEADER: &str = "X-workspace";
/// Control plane name
pub const MCP_HEADER: &str = "X-mcp";
/// Target the crate cluster itself
pub const USE_CRATE_HEADER: &str = "X-use-crate";
/// JSONPath expression applied to the response
pub const JSONPATH_HEADER: &str = "X-jsonpath";
/// jq filter applied to the response
pub const JQ_HEADER: &str = "X-jq";
/// Resource category for category aggregation
pub const CATEGORY_HEADER: &str = "X-category";
/// Legacy kubeconfig context selector
pub const CONTEXT_HEADER: &str = "X-context";
/// Legacy client certificate material
pub const CLIENT_CERTIFICATE_DATA_HEADER: &str = "X-Client-Certificate-Data";
/// Legacy client key material
pub const CLIENT_KEY_DATA_HEADER: &str = "X-Client-Key-Data";
/// Legacy cluster CA material
pub const CLUSTER_CA_DATA_HEADER: &str = "X-Cluster-Certificate-Authority-Data";

/// Headers never forwarded downstream
pub const PROHIBITED_REQUEST_HEADERS: &[&str] = &[
    CLIENT_CERTIFICATE_DATA_HEADER,
    CLIENT_KEY_DATA_HEADER,
    CLUSTER_CA_DATA_HEADER,
    PROJECT_HEADER,
    WORKSPACE_HEADER,
    MCP_HEADER,
    MCP_AUTHORIZATION_HEADER,
    CONTEXT_HEADER,
    USE_CRATE_HEADER,
    AUTHORIZATION_HEADER,
    JSONPATH_HEADER,
    JQ_HEADER,
    CATEGORY_HEADER,
    "User-Agent",
    "Host",
    // Downstream bodies are read and transformed uncompressed
    "Accept-Encoding",
];

/// Connection-level headers that never cross the gateway in either direction
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Transfer-Encoding",
    "Content-Length",
];

// ============================================================================
// Context
// ============================================================================

/// Where a tenant request is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionTarget {
    /// The crate cluster, authenticated with the crate token
    CrateCluster,
    /// A managed control plane, authenticated with the control-plane token
    ControlPlane(TenantCoordinates),
}

/// Everything a handler needs from the inbound request
#[derive(Debug, Clone)]
pub struct TenantContext {
    /// Inbound method
    pub method: Method,
    /// Inbound path, forwarded unchanged
    pub path: String,
    /// Query parameters in the order received
    pub query: Vec<(String, String)>,
    /// Inbound body
    pub body: Bytes,
    /// `X-project`
    pub project: Option<String>,
    /// `X-workspace`
    pub workspace: Option<String>,
    /// `X-mcp`
    pub control_plane: Option<String>,
    /// `X-use-crate`
    pub use_crate: bool,
    /// First Authorization segment
    pub crate_token: String,
    /// Second Authorization segment, or `X-mcp-authorization`
    pub control_plane_token: Option<String>,
    /// Requested response transformation
    pub transformation: Option<Transformation>,
    /// `X-category`
    pub category: Option<String>,
    /// Inbound headers minus the prohibited set
    pub forward_headers: HeaderMap,
}

impl TenantContext {
    /// Extract and validate the context of an inbound request
    pub fn extract(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Result<Self> {
        let authorization = header_value(headers, AUTHORIZATION_HEADER).ok_or_else(|| {
            Error::BadRequest(format!("{} header is required", AUTHORIZATION_HEADER))
        })?;
        let (crate_token, second_token) = parse_authorization(&authorization)?;
        let control_plane_token =
            second_token.or_else(|| header_value(headers, MCP_AUTHORIZATION_HEADER));

        let not_boolean =
            || Error::BadRequest(format!("{} has to be a boolean value", USE_CRATE_HEADER));
        let use_crate = match headers.get(USE_CRATE_HEADER) {
            Some(value) => match value.to_str().map_err(|_| not_boolean())?.trim() {
                "" => false,
                value => parse_bool(value).ok_or_else(not_boolean)?,
            },
            None => false,
        };

        // Expressions are validated before any downstream call
        let transformation = Transformation::from_headers(
            header_value(headers, JSONPATH_HEADER),
            header_value(headers, JQ_HEADER),
        )?;

        let query = match uri.query() {
            Some(_) => Query::<Vec<(String, String)>>::try_from_uri(uri)
                .map_err(|e| Error::BadRequest(format!("invalid query string: {}", e)))?
                .0,
            None => Vec::new(),
        };

        Ok(Self {
            method,
            path: uri.path().to_string(),
            query,
            body,
            project: header_value(headers, PROJECT_HEADER),
            workspace: header_value(headers, WORKSPACE_HEADER),
            control_plane: header_value(headers, MCP_HEADER),
            use_crate,
            crate_token,
            control_plane_token,
            transformation,
            category: header_value(headers, CATEGORY_HEADER),
            forward_headers: forwardable_headers(headers),
        })
    }

    /// Decide which cluster serves this request
    ///
    /// `X-use-crate: true` wins over tenant coordinates. Otherwise all three
    /// coordinates must be present.
    pub fn resolution_target(&self) -> Result<ResolutionTarget> {
        if self.use_crate {
            return Ok(ResolutionTarget::CrateCluster);
        }

        match (&self.project, &self.workspace, &self.control_plane) {
            (Some(project), Some(workspace), Some(control_plane)) => {
                Ok(ResolutionTarget::ControlPlane(TenantCoordinates {
                    project: project.clone(),
                    workspace: workspace.clone(),
                    control_plane: control_plane.clone(),
                }))
            }
            _ => Err(Error::BadRequest(format!(
                "either use {}: true or provide {}, {} and {} headers",
                USE_CRATE_HEADER, PROJECT_HEADER, WORKSPACE_HEADER, MCP_HEADER
            ))),
        }
    }
}

/// Split an Authorization value into crate token and optional control-plane token
///
/// Each segment is trimmed and loses an optional `Bearer ` prefix.
pub fn parse_authorization(value: &str) -> Result<(String, Option<String>)> {
    if value.trim().is_empty() {
        return Err(Error::BadRequest("authorization header is empty".into()));
    }

    let segments: Vec<&str> = value.split(',').collect();
    if segments.len() > 2 {
        return Err(Error::BadRequest(
            "authorization header must contain two or less tokens separated by a comma".into(),
        ));
    }

    let crate_token = bare_token(segments[0]);
    if crate_token.is_empty() {
        return Err(Error::BadRequest("crate token is empty".into()));
    }

    let control_plane_token = segments
        .get(1)
        .map(|segment| bare_token(segment))
        .filter(|token| !token.is_empty());

    Ok((crate_token, control_plane_token))
}

fn bare_token(segment: &str) -> String {
    let segment = segment.trim();
    segment
        .strip_prefix("Bearer ")
        .unwrap_or(segment)
        .trim()
        .to_string()
}

/// Parse the boolean spellings accepted by `X-use-crate`
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Inbound headers minus the prohibited and hop-by-hop sets
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in PROHIBITED_REQUEST_HEADERS.iter().chain(HOP_BY_HOP_HEADERS) {
        forwarded.remove(*name);
    }
    forwarded
}

/// Trimmed, non-empty header value
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn extract(pairs: &[(&str, &str)]) -> Result<TenantContext> {
        let uri: Uri = "/api/v1/pods?limit=10&labelSelector=app%3Dweb".parse().unwrap();
        TenantContext::extract(Method::GET, &uri, &headers(pairs), Bytes::new())
    }

    // ========================================================================
    // Authorization Parsing
    // ========================================================================

    #[test]
    fn test_single_token() {
        let (crate_token, cp) = parse_authorization("crate-token").unwrap();
        assert_eq!(crate_token, "crate-token");
        assert!(cp.is_none());
    }

    #[test]
    fn test_two_tokens() {
        let (crate_token, cp) = parse_authorization("crate-token,mcp-token").unwrap();
        assert_eq!(crate_token, "crate-token");
        assert_eq!(cp.as_deref(), Some("mcp-token"));
    }

    #[test]
    fn test_three_tokens_rejected() {
        assert!(matches!(
            parse_authorization("a,b,c"),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_empty_authorization_rejected() {
        assert!(parse_authorization("").is_err());
        assert!(parse_authorization("   ").is_err());
        assert!(parse_authorization(",mcp").is_err());
    }

    #[test]
    fn test_bearer_prefix_and_whitespace_stripped() {
        let (crate_token, cp) = parse_authorization("Bearer crate , Bearer mcp").unwrap();
        assert_eq!(crate_token, "crate");
        assert_eq!(cp.as_deref(), Some("mcp"));
    }

    #[test]
    fn test_empty_second_segment_is_absent() {
        let (_, cp) = parse_authorization("crate,").unwrap();
        assert!(cp.is_none());
    }

    // ========================================================================
    // Extraction
    // ========================================================================

    #[test]
    fn test_missing_authorization_rejected() {
        let err = extract(&[("X-use-crate", "true")]).unwrap_err();
        assert_eq!(err.to_string(), "Authorization header is required");
    }

    #[test]
    fn test_extract_full_context() {
        let ctx = extract(&[
            ("Authorization", "crate,mcp"),
            ("X-project", "alpha"),
            ("X-workspace", "dev"),
            ("X-mcp", "mcp-1"),
            ("X-jq", ".items"),
            ("Accept", "application/json"),
        ])
        .unwrap();

        assert_eq!(ctx.path, "/api/v1/pods");
        assert_eq!(
            ctx.query,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("labelSelector".to_string(), "app=web".to_string()),
            ]
        );
        assert_eq!(ctx.crate_token, "crate");
        assert_eq!(ctx.control_plane_token.as_deref(), Some("mcp"));
        assert_eq!(ctx.transformation, Some(Transformation::Jq(".items".into())));
        assert!(!ctx.use_crate);
        assert_eq!(ctx.forward_headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_mcp_authorization_fallback() {
        let ctx = extract(&[("Authorization", "crate"), ("X-mcp-authorization", "mcp")]).unwrap();
        assert_eq!(ctx.control_plane_token.as_deref(), Some("mcp"));
    }

    #[test]
    fn test_second_segment_wins_over_mcp_authorization() {
        let ctx = extract(&[
            ("Authorization", "crate,from-auth"),
            ("X-mcp-authorization", "from-header"),
        ])
        .unwrap();
        assert_eq!(ctx.control_plane_token.as_deref(), Some("from-auth"));
    }

    #[test]
    fn test_use_crate_values() {
        for value in ["1", "t", "T", "TRUE", "true", "True"] {
            let map = headers(&[("Authorization", "crate"), ("X-use-crate", value)]);
            let ctx = TenantContext::extract(Method::GET, &Uri::from_static("/"), &map, Bytes::new())
                .unwrap();
            assert!(ctx.use_crate, "{} should parse as true", value);
        }
        assert!(!extract(&[("Authorization", "crate"), ("X-use-crate", "false")])
            .unwrap()
            .use_crate);
    }

    #[test]
    fn test_use_crate_rejects_non_boolean() {
        let err = extract(&[("Authorization", "crate"), ("X-use-crate", "yes")]).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_use_crate_rejects_non_utf8() {
        let mut map = headers(&[("Authorization", "crate")]);
        map.insert(
            HeaderName::from_static("x-use-crate"),
            HeaderValue::from_bytes(b"tr\xffue").unwrap(),
        );
        let err = TenantContext::extract(Method::GET, &Uri::from_static("/"), &map, Bytes::new())
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_empty_use_crate_is_absent() {
        let ctx = extract(&[("Authorization", "crate"), ("X-use-crate", "  ")]).unwrap();
        assert!(!ctx.use_crate);
    }

    #[test]
    fn test_invalid_transformation_rejected_at_extraction() {
        let err = extract(&[("Authorization", "crate"), ("X-jq", ".[")]).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(err.to_string().starts_with("invalid jq filter"));

        let err = extract(&[("Authorization", "crate"), ("X-jsonpath", "{range .a}")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid jsonpath expression"));
    }

    #[test]
    fn test_prohibited_headers_not_forwarded() {
        let ctx = extract(&[
            ("Authorization", "crate,mcp"),
            ("X-project", "alpha"),
            ("X-workspace", "dev"),
            ("X-mcp", "mcp-1"),
            ("X-mcp-authorization", "x"),
            ("X-use-crate", "false"),
            ("X-jsonpath", "{.a}"),
            ("X-jq", "."),
            ("X-category", "managed"),
            ("X-context", "ctx"),
            ("X-Client-Certificate-Data", "cert"),
            ("X-Client-Key-Data", "key"),
            ("X-Cluster-Certificate-Authority-Data", "ca"),
            ("User-Agent", "curl"),
            ("Host", "gateway"),
            ("Connection", "keep-alive"),
            ("Content-Length", "0"),
            ("Accept-Encoding", "gzip, deflate, br"),
            ("Accept", "application/json"),
        ])
        .unwrap();

        assert_eq!(ctx.forward_headers.len(), 1);
        assert!(!ctx.forward_headers.contains_key("accept-encoding"));
        assert!(ctx.forward_headers.contains_key("accept"));
    }

    // ========================================================================
    // Resolution Target
    // ========================================================================

    #[test]
    fn test_use_crate_wins_over_coordinates() {
        let ctx = extract(&[
            ("Authorization", "crate"),
            ("X-use-crate", "true"),
            ("X-project", "alpha"),
            ("X-workspace", "dev"),
            ("X-mcp", "mcp-1"),
        ])
        .unwrap();
        assert_eq!(ctx.resolution_target().unwrap(), ResolutionTarget::CrateCluster);
    }

    #[test]
    fn test_full_coordinates_target_control_plane() {
        let ctx = extract(&[
            ("Authorization", "crate"),
            ("X-project", "alpha"),
            ("X-workspace", "dev"),
            ("X-mcp", "mcp-1"),
        ])
        .unwrap();
        assert_eq!(
            ctx.resolution_target().unwrap(),
            ResolutionTarget::ControlPlane(TenantCoordinates {
                project: "alpha".into(),
                workspace: "dev".into(),
                control_plane: "mcp-1".into(),
            })
        );
    }

    #[test]
    fn test_partial_coordinates_rejected_at_resolution() {
        let ctx = extract(&[
            ("Authorization", "crate"),
            ("X-project", "alpha"),
            ("X-workspace", "dev"),
        ])
        .unwrap();
        assert!(matches!(ctx.resolution_target(), Err(Error::BadRequest(_))));
    }
}
