//! Request handlers
//!
//! Every tenant handler follows the same pipeline and stops at the first
//! failure:
//!
//! ```text
//! extract context -> pick target -> obtain profile -> scope token -> call(s) -> transform -> respond
//! ```
//!
//! - Pass-through (`/` and any unmatched path): exactly one downstream call
//! - Category (`/managed`, `/c/{category}`): one discovery plus one call per collection
//! - BTP service operator (`/btp-so`): a fixed list of collections
//! - Well-known kubeconfig: the crate profile as YAML, no tenant resolution

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use ctlgate_kube::{ApiRequest, ConnectionProfile};
use http_body_util::LengthLimitError;
use tracing::debug;

use crate::aggregate::{aggregate_btp_service_operator, aggregate_category};
use crate::context::{
    ResolutionTarget, TenantContext, AUTHORIZATION_HEADER, MCP_AUTHORIZATION_HEADER,
};
use crate::error::{Error, Result};
use crate::response;
use crate::server::AppState;

/// Maximum inbound body size (10 MB)
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

// ============================================================================
// Shared Pipeline
// ============================================================================

async fn extract_context(request: Request<Body>) -> Result<TenantContext> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_SIZE).await.map_err(|e| {
        let e = e.into_inner();
        if exceeds_limit(&*e) {
            Error::PayloadTooLarge(format!(
                "request body exceeds the {} byte limit",
                MAX_BODY_SIZE
            ))
        } else {
            Error::BadRequest(format!("failed to read request body: {}", e))
        }
    })?;
    TenantContext::extract(parts.method, &parts.uri, &parts.headers, body)
}

fn exceeds_limit(mut e: &(dyn std::error::Error + 'static)) -> bool {
    loop {
        if e.is::<LengthLimitError>() {
            return true;
        }
        match e.source() {
            Some(source) => e = source,
            None => return false,
        }
    }
}

/// Produce the connection profile a tenant request runs with
///
/// The crate cluster gets the crate token. A control plane is resolved with
/// the crate token and then scoped to the control-plane token, which must be
/// present.
pub async fn resolve_profile(state: &AppState, ctx: &TenantContext) -> Result<ConnectionProfile> {
    let target = ctx.resolution_target()?;

    let crate_profile = state
        .credentials
        .current()
        .ok_or_else(|| Error::Internal("failed to get crate kubeconfig".into()))?;

    match target {
        ResolutionTarget::CrateCluster => {
            let mut profile = crate_profile;
            profile.set_user_token(&ctx.crate_token);
            Ok(profile)
        }
        ResolutionTarget::ControlPlane(coordinates) => {
            let token = ctx.control_plane_token.as_deref().ok_or_else(|| {
                Error::BadRequest(format!(
                    "control-plane token is required as second {} segment or in {}",
                    AUTHORIZATION_HEADER, MCP_AUTHORIZATION_HEADER
                ))
            })?;

            let mut profile = state
                .resolver
                .resolve(&coordinates, &ctx.crate_token, &crate_profile)
                .await
                .map_err(|e| Error::downstream("failed to get control plane api config", e))?;
            profile.set_user_token(token);

            debug!(
                namespace = %coordinates.namespace(),
                control_plane = %coordinates.control_plane,
                "Resolved control-plane profile"
            );
            Ok(profile)
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Forward the request unchanged to the resolved cluster
pub async fn passthrough_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response> {
    let ctx = extract_context(request).await?;
    let profile = resolve_profile(&state, &ctx).await?;

    debug!(method = %ctx.method, path = %ctx.path, "Forwarding request");

    let transformation = ctx.transformation;
    let api_request = ApiRequest {
        method: ctx.method,
        path: ctx.path,
        query: ctx.query,
        headers: ctx.forward_headers,
        body: ctx.body,
    };

    let upstream = state
        .client
        .send(api_request, &profile)
        .await
        .map_err(|e| Error::downstream("failed to make request to the api server", e))?;

    response::relay(upstream, transformation.as_ref())
}

/// Aggregate the `managed` category
pub async fn managed_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response> {
    category_response(&state, request, Some("managed".into())).await
}

/// Aggregate the category named in the path
pub async fn category_handler(
    State(state): State<AppState>,
    Path(category): Path<String>,
    request: Request<Body>,
) -> Result<Response> {
    category_response(&state, request, Some(category)).await
}

/// Aggregate the category named in `X-category` (`/c` and `/c/`)
pub async fn category_header_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response> {
    category_response(&state, request, None).await
}

async fn category_response(
    state: &AppState,
    request: Request<Body>,
    category: Option<String>,
) -> Result<Response> {
    let ctx = extract_context(request).await?;
    let category = category
        .filter(|c| !c.is_empty())
        .or_else(|| ctx.category.clone())
        .ok_or_else(|| Error::BadRequest("category not provided".into()))?;

    let profile = resolve_profile(state, &ctx).await?;
    let body = aggregate_category(
        state.discovery.as_ref(),
        state.client.as_ref(),
        &profile,
        &category,
        &ctx.forward_headers,
    )
    .await?;

    response::aggregate(body, ctx.transformation.as_ref())
}

/// Aggregate the BTP service-operator collections
pub async fn btp_service_operator_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response> {
    let ctx = extract_context(request).await?;
    let profile = resolve_profile(&state, &ctx).await?;

    let body =
        aggregate_btp_service_operator(state.client.as_ref(), &profile, &ctx.forward_headers)
            .await?;

    response::aggregate(body, ctx.transformation.as_ref())
}

/// Serve the crate kubeconfig as YAML
pub async fn kubeconfig_handler(State(state): State<AppState>) -> Result<Response> {
    let profile = state
        .credentials
        .current()
        .ok_or_else(|| Error::Internal("failed to get crate kubeconfig".into()))?;

    let yaml = profile
        .to_yaml()
        .map_err(|e| Error::Internal(format!("failed to marshal kubeconfig: {}", e)))?;

    Ok(([(CONTENT_TYPE, "application/yaml")], yaml).into_response())
}

/// Report the build version and commit
pub async fn version_handler(State(state): State<AppState>) -> Response {
    Json(state.build.clone()).into_response()
}
