//! Response assembly for tenant handlers

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use ctlgate_kube::RawResponse;
use tracing::debug;

use crate::context::HOP_BY_HOP_HEADERS;
use crate::error::{Error, Result};
use crate::transform::Transformation;

/// Marks responses produced after resolving a tenant profile
pub const CONTROLPLANE_MARKER_HEADER: &str = "X-Response-From-Controlplane";

const JSON: &str = "application/json";

/// Relay a downstream response, applying the transformation to successful bodies
///
/// Error responses (status >= 400) pass through untouched. A transformed body
/// drops the upstream Content-Type and Content-Length and is served as JSON.
pub fn relay(upstream: RawResponse, transformation: Option<&Transformation>) -> Result<Response> {
    debug!(
        status = upstream.status.as_u16(),
        body_len = upstream.body.len(),
        "Received response from api server"
    );

    let (headers, body) = match transformation {
        Some(transformation) if !upstream.is_error() => {
            let body = transformation.apply(&upstream.body)?;
            let mut headers = copy_headers(&upstream.headers, &[CONTENT_TYPE, CONTENT_LENGTH]);
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
            (headers, Bytes::from(body))
        }
        _ => (copy_headers(&upstream.headers, &[]), upstream.body),
    };

    build(upstream.status, headers, body)
}

/// Serve an aggregated JSON array, applying the optional transformation
pub fn aggregate(body: Bytes, transformation: Option<&Transformation>) -> Result<Response> {
    let body = match transformation {
        Some(transformation) => Bytes::from(transformation.apply(&body)?),
        None => body,
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    build(StatusCode::OK, headers, body)
}

fn build(status: StatusCode, mut headers: HeaderMap, body: Bytes) -> Result<Response> {
    headers.insert(
        HeaderName::from_static("x-response-from-controlplane"),
        HeaderValue::from_static("true"),
    );

    let mut response = Response::builder()
        .status(status)
        .body(Body::from(body))
        .map_err(|e| Error::Internal(format!("failed to build response: {}", e)))?;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Upstream headers minus hop-by-hop headers and `excluded`
fn copy_headers(upstream: &HeaderMap, excluded: &[HeaderName]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        let hop_by_hop = HOP_BY_HOP_HEADERS
            .iter()
            .any(|h| name.as_str().eq_ignore_ascii_case(h));
        if hop_by_hop || excluded.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}
