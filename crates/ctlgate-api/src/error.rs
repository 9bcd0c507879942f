//! Error types for the gateway handlers

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

/// Result type for handler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for handler operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inbound request is malformed or incomplete
    #[error("{0}")]
    BadRequest(String),

    /// The requested resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// The inbound body exceeds the size limit
    #[error("{0}")]
    PayloadTooLarge(String),

    /// The downstream API server could not be reached or failed an aggregate fetch
    #[error("{0}")]
    BadGateway(String),

    /// Decoding, transformation or credential resolution failed
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Kubernetes-style reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::NotFound(_) => "NotFound",
            Error::PayloadTooLarge(_) => "RequestEntityTooLarge",
            Error::BadGateway(_) => "BadGateway",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Map a downstream failure, prefixing it with what was being attempted
    pub fn downstream(context: &str, e: ctlgate_kube::Error) -> Self {
        let message = format!("{}: {}", context, e);
        if e.is_transport() {
            Error::BadGateway(message)
        } else {
            Error::Internal(message)
        }
    }
}

impl From<ctlgate_kube::Error> for Error {
    fn from(e: ctlgate_kube::Error) -> Self {
        if e.is_transport() {
            Error::BadGateway(e.to_string())
        } else {
            Error::Internal(e.to_string())
        }
    }
}

/// Kubernetes `Status` failure body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status<'a> {
    kind: &'static str,
    api_version: &'static str,
    status: &'static str,
    code: u16,
    reason: &'a str,
    message: &'a str,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error!(error = %self, reason = self.reason(), "Request processing failed");

        let status = self.status();
        let message = self.to_string();
        let body = Status {
            kind: "Status",
            api_version: "v1",
            status: "Failure",
            code: status.as_u16(),
            reason: self.reason(),
            message: &message,
        };

        let body = match serde_json::to_vec(&body) {
            Ok(body) => body,
            Err(_) => format!("{}: {}", self.reason(), message).into_bytes(),
        };

        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bad_request_renders_status() {
        let response = Error::BadRequest("Authorization header is required".into()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let json = body_json(response).await;
        assert_eq!(json["kind"], "Status");
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["status"], "Failure");
        assert_eq!(json["code"], 400);
        assert_eq!(json["reason"], "BadRequest");
        assert_eq!(json["message"], "Authorization header is required");
    }

    #[tokio::test]
    async fn test_status_codes() {
        let cases = [
            (Error::NotFound("x".into()), 404),
            (Error::PayloadTooLarge("x".into()), 413),
            (Error::BadGateway("x".into()), 502),
            (Error::Internal("x".into()), 500),
        ];
        for (err, code) in cases {
            let response = err.into_response();
            assert_eq!(response.status().as_u16(), code);
            assert_eq!(body_json(response).await["code"], code);
        }
    }

    #[test]
    fn test_transport_maps_to_bad_gateway() {
        let err: Error = ctlgate_kube::Error::Transport("connection refused".into()).into();
        assert!(matches!(err, Error::BadGateway(_)));

        let err: Error = ctlgate_kube::Error::Decode("bad".into()).into();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_downstream_prefixes_context() {
        let err = Error::downstream(
            "failed to get control plane api config",
            ctlgate_kube::Error::ControlPlane("control-plane authentication key is empty".into()),
        );
        assert_eq!(
            err.to_string(),
            "failed to get control plane api config: control plane error: control-plane authentication key is empty"
        );
        assert!(matches!(err, Error::Internal(_)));
    }
}
