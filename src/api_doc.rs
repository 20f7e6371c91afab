use utoipa::openapi::content::ContentBuilder;
use utoipa::openapi::header::HeaderBuilder;
use utoipa::openapi::path::{HttpMethod, Operation, OperationBuilder, ParameterBuilder, ParameterIn};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::response::{Response, ResponseBuilder};
use utoipa::openapi::schema::{ObjectBuilder, Schema, Type};
use utoipa::openapi::{Ref, RefOr, Required};
use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers;
use crate::models::HealthResponse;
use crate::routes::{RouteDefinition, RouteTable};
use crate::status::StatusClass;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "s3-proxy-gateway API",
        version = "1.0.0",
        description = "HTTP gateway proxying object reads and writes to an S3 bucket under a delegated identity"
    ),
    paths(
        handlers::health::health_handler
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse
        )
    ),
    tags(
        (name = "health", description = "Health check operations"),
        (name = "proxy", description = "Object storage proxy routes")
    )
)]
pub struct ApiDoc;

/// The full document: the derived part plus one operation per declared route
pub fn openapi(table: &RouteTable, stage: &str) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    for route in table.routes() {
        let path = if stage.is_empty() {
            route.pattern_source.to_string()
        } else {
            format!("/{}{}", stage, route.pattern_source)
        };
        let method = if route.method == axum::http::Method::PUT {
            HttpMethod::Put
        } else {
            HttpMethod::Get
        };
        doc.paths.add_path_operation(path, vec![method], operation(route));
    }
    doc
}

fn string_schema() -> RefOr<Schema> {
    RefOr::T(Schema::Object(
        ObjectBuilder::new().schema_type(Type::String).build(),
    ))
}

fn operation(route: &RouteDefinition) -> Operation {
    let mut builder = OperationBuilder::new()
        .operation_id(Some(route.kind.name()))
        .tags(Some(["proxy"]))
        .summary(Some(format!(
            "{} object {{bucket}}/{} under the {} scope",
            route.method, route.key_template, route.scope
        )));

    for capture in route.pattern.captures() {
        builder = builder.parameter(
            ParameterBuilder::new()
                .name(capture)
                .parameter_in(ParameterIn::Path)
                .required(Required::True)
                .schema(Some(string_schema())),
        );
    }
    for header in &route.required_headers {
        builder = builder.parameter(
            ParameterBuilder::new()
                .name(header.as_str())
                .parameter_in(ParameterIn::Header)
                .required(Required::True)
                .description(Some("Forwarded unchanged to object storage"))
                .schema(Some(string_schema())),
        );
    }

    if route.method == axum::http::Method::PUT {
        builder = builder.request_body(Some(
            RequestBodyBuilder::new()
                .description(Some("Object content, stored unchanged"))
                .content("application/octet-stream", ContentBuilder::new().build())
                .required(Some(Required::True))
                .build(),
        ));
    }

    for rule in &route.status_rules {
        builder = builder.response(rule.respond_with.as_str(), rule_response(route, rule.class()));
    }

    builder.build()
}

fn rule_response(route: &RouteDefinition, class: Option<StatusClass>) -> Response {
    match class {
        Some(StatusClass::Success) => {
            let mut response = ResponseBuilder::new().description("Object storage succeeded");
            for (from, to) in &route.response_header_map {
                response = response.header(
                    to.as_str(),
                    HeaderBuilder::new()
                        .schema(string_schema())
                        .description(Some(format!("Storage response header {}", from)))
                        .build(),
                );
            }
            response.build()
        }
        other => {
            let description = match other {
                Some(StatusClass::ClientError) => "Object storage rejected the request",
                _ => "Object storage failed",
            };
            ResponseBuilder::new()
                .description(description)
                .content(
                    "application/json",
                    ContentBuilder::new()
                        .schema(Some(Ref::from_schema_name("ErrorResponse")))
                        .build(),
                )
                .build()
        }
    }
}
