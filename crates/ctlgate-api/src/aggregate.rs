//! Collection aggregation
//!
//! Fetches several resource collections in order and joins their bodies into
//! one JSON array (`[body1,body2,...]`). Every body must be a successful,
//! well-formed JSON document; the first failure aborts the aggregate.

use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderValue};
use bytes::{BufMut, Bytes, BytesMut};
use ctlgate_kube::discovery::category_resources;
use ctlgate_kube::{ApiClient, ApiRequest, ConnectionProfile};
use serde::de::IgnoredAny;
use tracing::debug;

use crate::error::{Error, Result};

/// Collections behind the BTP service-operator view
pub const BTP_SERVICE_OPERATOR_RESOURCES: &[&str] = &[
    "/apis/services.cloud.sap.com/v1/servicebindings",
    "/apis/services.cloud.sap.com/v1/serviceinstances",
];

/// Fetch each path with `headers` and join the bodies into a JSON array
pub async fn fetch_collections(
    client: &dyn ApiClient,
    profile: &ConnectionProfile,
    paths: &[String],
    headers: &HeaderMap,
) -> Result<Bytes> {
    let mut bodies = Vec::with_capacity(paths.len());

    for path in paths {
        let mut request = ApiRequest::get(path.as_str());
        request.headers = headers.clone();

        let response = client
            .send(request, profile)
            .await
            .map_err(|e| Error::downstream("failed to make request to the api server", e))?;

        if response.is_error() {
            return Err(Error::BadGateway(format!(
                "api server returned status {} for {}",
                response.status.as_u16(),
                path
            )));
        }
        if let Err(e) = serde_json::from_slice::<IgnoredAny>(&response.body) {
            return Err(Error::Internal(format!(
                "api server returned malformed json for {}: {}",
                path, e
            )));
        }

        debug!(path = %path, body_len = response.body.len(), "Fetched collection");
        bodies.push(response.body);
    }

    Ok(join_array(&bodies))
}

/// Discover every collection declaring `category` and aggregate them
pub async fn aggregate_category(
    discovery: &dyn ApiClient,
    client: &dyn ApiClient,
    profile: &ConnectionProfile,
    category: &str,
    headers: &HeaderMap,
) -> Result<Bytes> {
    let groups = discovery
        .discover_by_category(profile, category)
        .await
        .map_err(|e| Error::downstream("failed to get managed resources", e))?;

    let paths: Vec<String> = category_resources(&groups)
        .iter()
        .map(|resource| resource.collection_path())
        .collect();
    debug!(category = %category, collections = paths.len(), "Aggregating category");

    fetch_collections(client, profile, &paths, headers).await
}

/// Aggregate the BTP service-operator collections, always asking for JSON
pub async fn aggregate_btp_service_operator(
    client: &dyn ApiClient,
    profile: &ConnectionProfile,
    headers: &HeaderMap,
) -> Result<Bytes> {
    let mut headers = headers.clone();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let paths: Vec<String> = BTP_SERVICE_OPERATOR_RESOURCES
        .iter()
        .map(|path| path.to_string())
        .collect();
    fetch_collections(client, profile, &paths, &headers).await
}

fn join_array(bodies: &[Bytes]) -> Bytes {
    let len = bodies.iter().map(Bytes::len).sum::<usize>() + bodies.len() + 2;
    let mut joined = BytesMut::with_capacity(len);
    joined.put_u8(b'[');
    for (i, body) in bodies.iter().enumerate() {
        if i > 0 {
            joined.put_u8(b',');
        }
        joined.put_slice(body);
    }
    joined.put_u8(b']');
    joined.freeze()
}
