use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::trace::TraceLayer;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc;
use crate::handlers;
use crate::routes;
use crate::state::AppState;

/// Assemble the HTTP application: health, API docs, and the proxy fallback
/// that serves every declared route below the stage prefix.
pub fn build_app(state: AppState) -> Router {
    let openapi = api_doc::openapi(state.proxy.table(), &state.config.stage_name);

    Router::new()
        .route(routes::HEALTH, get(handlers::health_handler))
        .merge(SwaggerUi::new(routes::SWAGGER_UI).url(routes::OPENAPI_JSON, openapi))
        .fallback(handlers::proxy_handler)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
