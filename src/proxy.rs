use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::{RouteDefinition, RouteTable};
use crate::status::{self, StatusClass};
use crate::storage::{ObjectStore, StorageMethod, StorageRequest, StorageResponse};

/// An inbound caller request, with the stage prefix already removed
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Maps inbound requests onto storage operations and storage responses back
/// onto caller responses.
pub struct ProxyRouter {
    table: RouteTable,
    bucket: String,
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl ProxyRouter {
    pub fn new(
        table: RouteTable,
        bucket: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            table,
            bucket: bucket.into(),
            store,
            timeout,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Route one request: resolve, translate, make exactly one storage call,
    /// translate the response back.
    pub async fn route(&self, request: InboundRequest) -> Result<Response, ApiError> {
        let span = tracing::info_span!(
            "proxy",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path
        );
        self.route_inner(request).instrument(span).await
    }

    async fn route_inner(&self, request: InboundRequest) -> Result<Response, ApiError> {
        let (route, captures) = self.table.resolve(&request.method, &request.path)?;

        for required in &route.required_headers {
            if !request.headers.contains_key(required) {
                tracing::info!("Rejected {}: missing header {}", route.kind.name(), required);
                return Err(ApiError::MissingHeader(required.to_string()));
            }
        }

        // Storage requests carry header values as text; anything else would be lost.
        let headers = forwarded_headers(route, &request.headers);
        if let Some((name, _)) = headers.iter().find(|(_, value)| value.to_str().is_err()) {
            tracing::info!("Rejected {}: header {} is not visible ASCII", route.kind.name(), name);
            return Err(ApiError::InvalidHeader(name.to_string()));
        }

        if !route.scope.permits(&route.method) {
            return Err(ApiError::ScopeViolation(format!(
                "{} requires more than the {} scope",
                route.kind.name(),
                route.scope
            )));
        }

        let key = route.key_template.render(&captures).map_err(|err| {
            tracing::error!("Failed to build key for {}: {:#}", route.kind.name(), err);
            ApiError::ServerError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
            }
        })?;
        let storage_request = StorageRequest {
            method: storage_method(&route.method),
            bucket: self.bucket.clone(),
            key: key.clone(),
            headers,
            body: if route.method == Method::PUT {
                request.body
            } else {
                Bytes::new()
            },
            scope: route.scope,
        };

        let storage_response = tokio::time::timeout(self.timeout, self.store.execute(storage_request))
            .await
            .map_err(|_| {
                tracing::warn!("Storage call for {} timed out after {:?}", key, self.timeout);
                ApiError::StorageTimeout(self.timeout)
            })??;

        let storage_status = storage_response.status;
        let result = translate_response(route, storage_response);
        let caller_status = match &result {
            Ok(response) => response.status(),
            Err(ApiError::ClientError { status } | ApiError::ServerError { status }) => *status,
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::info!(
            route = route.kind.name(),
            key = %key,
            storage_status,
            caller_status = caller_status.as_u16(),
            "Routed request"
        );
        result
    }
}

fn storage_method(method: &Method) -> StorageMethod {
    if *method == Method::PUT {
        StorageMethod::Put
    } else {
        StorageMethod::Get
    }
}

/// Copy the route's forwarded headers, and nothing else, off the inbound request
pub fn forwarded_headers(route: &RouteDefinition, inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in &route.forwarded_headers {
        for value in inbound.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Storage headers renamed per the route's response header map. Unmapped
/// storage headers are dropped.
pub fn mapped_headers(route: &RouteDefinition, storage: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (from, to) in &route.response_header_map {
        if let Some(value) = storage.get(from) {
            headers.insert(to.clone(), value.clone());
        }
    }
    headers
}

/// Turn a storage response into the caller response selected by the route's
/// status rules.
///
/// Statuses no rule selects (redirects, informational and 2xx other than the
/// declared success code) are reported as server errors.
pub fn translate_response(
    route: &RouteDefinition,
    storage: StorageResponse,
) -> Result<Response, ApiError> {
    let Some(rule) = status::select(&route.status_rules, storage.status) else {
        tracing::warn!(
            "No status rule of {} selects storage status {}",
            route.kind.name(),
            storage.status
        );
        return Err(ApiError::ServerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        });
    };

    match rule.class() {
        Some(StatusClass::Success) => {
            let mut response = Response::new(Body::from(storage.body));
            *response.status_mut() = rule.respond_with;
            *response.headers_mut() = mapped_headers(route, &storage.headers);
            Ok(response)
        }
        Some(StatusClass::ClientError) => Err(ApiError::ClientError {
            status: rule.respond_with,
        }),
        Some(StatusClass::ServerError) | None => Err(ApiError::ServerError {
            status: rule.respond_with,
        }),
    }
}

/// Strip the stage prefix (`/v1`) from a request path. An empty stage serves
/// routes from the root.
pub fn strip_stage<'a>(stage: &str, path: &'a str) -> Option<&'a str> {
    if stage.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix('/')?.strip_prefix(stage)?;
    rest.starts_with('/').then_some(rest)
}
