use crate::error::ApiError;
use crate::proxy::{strip_stage, InboundRequest};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use bytes::Bytes;

/// Fallback handler for every path below the stage prefix
///
/// Route resolution is done by the proxy's own route table rather than by
/// axum, so that matching, required headers and status rules all come from
/// one set of route definitions.
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = strip_stage(&state.config.stage_name, uri.path())
        .ok_or_else(|| ApiError::RouteNotFound(uri.path().to_string()))?;

    state
        .proxy
        .route(InboundRequest {
            method,
            path: path.to_string(),
            headers,
            body,
        })
        .await
}
