use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error response type
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Custom error type for the proxy
///
/// Every failure a caller can observe goes through this type, so that storage
/// details never reach the caller: storage outcomes are reduced to their
/// class, and only a generic message is rendered.
#[derive(Debug)]
pub enum ApiError {
    /// No declared path pattern matches the request path
    RouteNotFound(String),
    /// The path matches a declared pattern, but not under this method
    MethodNotAllowed { method: Method, allowed: Vec<Method> },
    /// A captured path segment cannot be used in an object key
    InvalidPathParameter { name: String, value: String },
    /// A header the route marks as required is absent
    MissingHeader(String),
    /// A forwarded header value that cannot be passed to storage unchanged
    InvalidHeader(String),
    /// Storage answered with a status selected by a client-error rule
    ClientError { status: StatusCode },
    /// Storage answered with a status selected by a server-error rule, or with
    /// a status no rule selects
    ServerError { status: StatusCode },
    /// The storage call failed before any response arrived
    StorageUnavailable(anyhow::Error),
    /// The storage call did not finish in time
    StorageTimeout(Duration),
    /// The route tried to run an operation its delegated scope does not allow
    ScopeViolation(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut allow = None;
        let (status, error_message) = match self {
            ApiError::RouteNotFound(path) => (
                StatusCode::NOT_FOUND,
                format!("No route matches path: {}", path),
            ),
            ApiError::MethodNotAllowed { method, allowed } => {
                let allowed = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                allow = HeaderValue::from_str(&allowed).ok();
                (
                    StatusCode::METHOD_NOT_ALLOWED,
                    format!("Method {} not allowed, expected one of: {}", method, allowed),
                )
            }
            ApiError::InvalidPathParameter { name, value } => (
                StatusCode::BAD_REQUEST,
                format!("Invalid path parameter '{}': '{}'", name, value),
            ),
            ApiError::MissingHeader(name) => (
                StatusCode::BAD_REQUEST,
                format!("Missing required header: {}", name),
            ),
            ApiError::InvalidHeader(name) => (
                StatusCode::BAD_REQUEST,
                format!("Header {} must contain only visible ASCII characters", name),
            ),
            ApiError::ClientError { status } => (
                status,
                "The storage service rejected the request".to_string(),
            ),
            ApiError::ServerError { status } => (
                status,
                "The storage service failed to process the request".to_string(),
            ),
            ApiError::StorageUnavailable(err) => {
                tracing::error!("Storage call failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The storage service is unavailable".to_string(),
                )
            }
            ApiError::StorageTimeout(timeout) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("The storage service did not respond within {:?}", timeout),
            ),
            ApiError::ScopeViolation(message) => {
                tracing::error!("Delegated scope violation: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The route is not permitted to perform this operation".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        let mut response = (status, body).into_response();
        if let Some(allow) = allow {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::StorageUnavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn error_body(response: Response) -> ErrorResponse {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_client_error_is_generic() {
        let response = ApiError::ClientError {
            status: StatusCode::BAD_REQUEST,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert_eq!(body.error, "The storage service rejected the request");
    }

    #[tokio::test]
    async fn test_method_not_allowed_sets_allow_header() {
        let response = ApiError::MethodNotAllowed {
            method: Method::DELETE,
            allowed: vec![Method::GET, Method::PUT],
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, PUT");
    }

    #[tokio::test]
    async fn test_storage_failure_hides_details() {
        let response =
            ApiError::from(anyhow::anyhow!("connection refused to 10.0.0.1")).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = error_body(response).await;
        assert!(!body.error.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_missing_header_names_header() {
        let response = ApiError::MissingHeader("accept".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert!(body.error.contains("accept"));
    }

    #[tokio::test]
    async fn test_invalid_header_is_bad_request() {
        let response = ApiError::InvalidHeader("content-type".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert!(body.error.contains("content-type"));
    }
}
