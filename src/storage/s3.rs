use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::http::HttpRequest;
use aws_sdk_s3::config::interceptors::BeforeDeserializationInterceptorContextRef;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{ConfigBag, Intercept, Region, RuntimeComponents};
use aws_sdk_s3::error::{BoxError, DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use std::sync::{Arc, Mutex};

use super::{ObjectStore, StorageMethod, StorageRequest, StorageResponse};
use crate::config::Config;
use crate::delegation::{DelegatedIdentity, PermissionScope};

/// S3 object store with one client per delegated scope
///
/// Each client signs with credentials of its own [`DelegatedIdentity`]. When a
/// role ARN is configured these come from STS AssumeRole with a session policy
/// restricting the session to that scope on the configured bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    read: Client,
    read_write: Client,
}

impl S3ObjectStore {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.aws_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        Self::from_sdk_config(&sdk_config, config).await
    }

    /// Build both scoped clients on top of an already loaded SDK configuration
    pub async fn from_sdk_config(sdk_config: &SdkConfig, config: &Config) -> Result<Self> {
        let read = Self::client_for(sdk_config, config, PermissionScope::Read).await?;
        let read_write = Self::client_for(sdk_config, config, PermissionScope::ReadWrite).await?;

        tracing::info!(
            "S3 object store ready for bucket {} (endpoint: {})",
            config.bucket_name,
            config.s3_endpoint_url.as_deref().unwrap_or("AWS default")
        );

        Ok(Self { read, read_write })
    }

    async fn client_for(
        sdk_config: &SdkConfig,
        config: &Config,
        scope: PermissionScope,
    ) -> Result<Client> {
        let identity = DelegatedIdentity::for_scope(config, scope);

        // The proxy never retries; one inbound request is one storage call.
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(config.s3_force_path_style)
            .retry_config(RetryConfig::disabled());
        if let Some(endpoint) = &config.s3_endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        match &identity.role_arn {
            Some(role_arn) => {
                let policy = serde_json::to_string(&scope.session_policy(&config.bucket_name))
                    .context("Failed to serialize session policy")?;
                let provider = AssumeRoleProvider::builder(role_arn)
                    .session_name(&identity.session_name)
                    .policy(policy)
                    .configure(sdk_config)
                    .build()
                    .await;
                builder = builder.credentials_provider(provider);
                tracing::info!(
                    "{} storage calls assume {} as session {}",
                    identity.scope,
                    role_arn,
                    identity.session_name
                );
            }
            None if config.allow_ambient_credentials => {
                tracing::warn!(
                    "ALLOW_AMBIENT_CREDENTIALS is set; {} storage calls use the ambient credential chain",
                    identity.scope
                );
            }
            None => bail!(
                "DELEGATED_ROLE_ARN is required for {} storage calls on the s3 backend",
                identity.scope
            ),
        }

        Ok(Client::from_conf(builder.build()))
    }

    fn client(&self, scope: PermissionScope) -> &Client {
        match scope {
            PermissionScope::Read => &self.read,
            PermissionScope::ReadWrite => &self.read_write,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn execute(&self, request: StorageRequest) -> Result<StorageResponse> {
        let client = self.client(request.scope);
        if let Some((name, _)) = request.headers.iter().find(|(_, value)| value.to_str().is_err()) {
            bail!("Forwarded header {} cannot be sent to S3 unchanged", name);
        }
        let capture = ResponseCapture::default();
        let forwarded = forward_headers(request.headers);

        let body = match request.method {
            StorageMethod::Get => {
                let result = client
                    .get_object()
                    .bucket(&request.bucket)
                    .key(&request.key)
                    .customize()
                    .mutate_request(forwarded)
                    .interceptor(capture.clone())
                    .send()
                    .await;
                match result {
                    Ok(output) => output
                        .body
                        .collect()
                        .await
                        .context("Failed to read S3 object body")?
                        .into_bytes(),
                    Err(err) => {
                        capture.require_response(err)?;
                        Bytes::new()
                    }
                }
            }
            StorageMethod::Put => {
                let result = client
                    .put_object()
                    .bucket(&request.bucket)
                    .key(&request.key)
                    .body(ByteStream::from(request.body))
                    .customize()
                    .mutate_request(forwarded)
                    .interceptor(capture.clone())
                    .send()
                    .await;
                if let Err(err) = result {
                    capture.require_response(err)?;
                }
                Bytes::new()
            }
        };

        let (status, headers) = capture
            .take()
            .context("S3 call completed without a recorded response")?;
        tracing::debug!(
            "S3 {:?} {}/{} returned {}",
            request.method,
            request.bucket,
            request.key,
            status
        );

        Ok(StorageResponse {
            status,
            headers,
            body,
        })
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}

/// Request hook that sets each forwarded header on the signed S3 request
fn forward_headers(headers: HeaderMap) -> impl Fn(&mut HttpRequest) + Send + Sync + 'static {
    move |request: &mut HttpRequest| {
        for (name, value) in headers.iter() {
            if let Ok(value) = value.to_str() {
                request
                    .headers_mut()
                    .insert(name.as_str().to_owned(), value.to_owned());
            }
        }
    }
}

/// Records the raw status and headers of the last S3 response, which the SDK
/// does not expose on successful outputs.
#[derive(Debug, Clone, Default)]
struct ResponseCapture {
    slot: Arc<Mutex<Option<(u16, HeaderMap)>>>,
}

impl Intercept for ResponseCapture {
    fn name(&self) -> &'static str {
        "ResponseCapture"
    }

    fn read_before_deserialization(
        &self,
        context: &BeforeDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let response = context.response();
        let headers = to_header_map(response.headers().iter());
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((response.status().as_u16(), headers));
        }
        Ok(())
    }
}

impl ResponseCapture {
    fn take(&self) -> Option<(u16, HeaderMap)> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }

    /// A service error still carries a response, which is a normal outcome for
    /// the proxy. Only calls that never got a response are failures.
    fn require_response<E>(&self, err: SdkError<E>) -> Result<()>
    where
        E: std::error::Error + 'static,
    {
        let recorded = self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false);
        if recorded {
            Ok(())
        } else {
            Err(anyhow::anyhow!("S3 request failed: {}", DisplayErrorContext(&err)))
        }
    }
}

fn to_header_map<'a>(headers: impl Iterator<Item = (&'a str, &'a str)>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::warn!("Ignoring malformed S3 response header {}", name),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{Credentials, SharedCredentialsProvider};
    use axum::extract::{Path, State};
    use axum::http::{header, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;

    const BUCKET: &str = "photos";
    const OBJECT_DATE: &str = "Sun, 06 Nov 1994 08:49:37 GMT";

    type SeenHeaders = Arc<Mutex<Vec<HeaderMap>>>;

    /// Minimal path-style S3 endpoint: `ok` objects exist, `boom` objects fail
    /// with 503, anything else is `NoSuchKey`.
    async fn fake_get(
        State(seen): State<SeenHeaders>,
        Path((_bucket, key)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> Response {
        seen.lock().unwrap().push(headers);
        if key.ends_with("/ok") {
            (
                StatusCode::OK,
                [
                    (header::DATE, OBJECT_DATE),
                    (header::CONTENT_TYPE, "text/plain"),
                    (HeaderName::from_static("x-amz-request-id"), "fake-1"),
                ],
                "hello",
            )
                .into_response()
        } else if key.ends_with("/boom") {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "application/xml")],
                "<Error><Code>SlowDown</Code><Message>Please reduce your request rate.</Message></Error>",
            )
                .into_response()
        } else {
            (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "application/xml")],
                "<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
            )
                .into_response()
        }
    }

    async fn fake_put(State(seen): State<SeenHeaders>, headers: HeaderMap) -> Response {
        seen.lock().unwrap().push(headers);
        (StatusCode::OK, [(header::ETAG, "\"fake-etag\"")]).into_response()
    }

    async fn spawn_fake_s3() -> (String, SeenHeaders) {
        let seen = SeenHeaders::default();
        let app = Router::new()
            .route("/{bucket}/{*key}", get(fake_get).put(fake_put))
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", address), seen)
    }

    fn fake_s3_config(endpoint: &str) -> Config {
        Config::from_lookup(|name| match name {
            "BUCKET_NAME" => Some(BUCKET.to_string()),
            "S3_ENDPOINT_URL" => Some(endpoint.to_string()),
            "S3_FORCE_PATH_STYLE" => Some("true".to_string()),
            "ALLOW_AMBIENT_CREDENTIALS" => Some("true".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn static_sdk_config() -> SdkConfig {
        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                "test", "test", None, None, "fake-s3",
            )))
            .build()
    }

    async fn store_for(endpoint: &str) -> S3ObjectStore {
        S3ObjectStore::from_sdk_config(&static_sdk_config(), &fake_s3_config(endpoint))
            .await
            .unwrap()
    }

    fn get_request(key: &str, headers: HeaderMap) -> StorageRequest {
        StorageRequest {
            method: StorageMethod::Get,
            bucket: BUCKET.to_string(),
            key: key.to_string(),
            headers,
            body: Bytes::new(),
            scope: PermissionScope::Read,
        }
    }

    #[tokio::test]
    async fn test_s3_success_keeps_raw_headers() {
        let (endpoint, seen) = spawn_fake_s3().await;
        let store = store_for(&endpoint).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));

        let response = store
            .execute(get_request("docs/ok", headers))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.headers["date"], OBJECT_DATE);
        assert_eq!(response.headers["content-type"], "text/plain");
        assert_eq!(response.headers["content-length"], "5");
        assert_eq!(response.body, Bytes::from_static(b"hello"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["accept"], "text/plain");
    }

    #[tokio::test]
    async fn test_s3_error_statuses_are_responses() {
        let (endpoint, seen) = spawn_fake_s3().await;
        let store = store_for(&endpoint).await;

        let missing = store
            .execute(get_request("docs/missing", HeaderMap::new()))
            .await
            .unwrap();
        let failing = store
            .execute(get_request("docs/boom", HeaderMap::new()))
            .await
            .unwrap();

        assert_eq!(missing.status, 404);
        assert_eq!(failing.status, 503);
        // Retries are disabled, so each call reached the endpoint once.
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_s3_put_forwards_content_type() {
        let (endpoint, seen) = spawn_fake_s3().await;
        let store = store_for(&endpoint).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/markdown"));

        let response = store
            .execute(StorageRequest {
                method: StorageMethod::Put,
                bucket: BUCKET.to_string(),
                key: "42/notes.md".to_string(),
                headers,
                body: Bytes::from_static(b"# notes"),
                scope: PermissionScope::ReadWrite,
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(seen.lock().unwrap()[0]["content-type"], "text/markdown");
    }

    #[tokio::test]
    async fn test_s3_rejects_non_ascii_header_before_sending() {
        let (endpoint, seen) = spawn_fake_s3().await;
        let store = store_for(&endpoint).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_bytes(b"text/caf\xe9").unwrap());

        let result = store.execute(get_request("docs/ok", headers)).await;

        assert!(result.is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_s3_store_requires_role_unless_ambient_allowed() {
        let mut config = fake_s3_config("http://127.0.0.1:9");
        config.allow_ambient_credentials = false;

        let result = S3ObjectStore::from_sdk_config(&static_sdk_config(), &config).await;

        let error = result.err().unwrap();
        assert!(error.to_string().contains("DELEGATED_ROLE_ARN"));
    }

    #[tokio::test]
    async fn test_s3_refused_connection_is_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let store = store_for(&format!("http://{}", address)).await;

        let result = store.execute(get_request("docs/ok", HeaderMap::new())).await;

        assert!(result.is_err());
    }

    #[test]
    fn test_to_header_map_keeps_repeated_headers() {
        let raw = vec![
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("x-amz-meta-tag", "a"),
            ("x-amz-meta-tag", "b"),
        ];

        let map = to_header_map(raw.into_iter());

        assert_eq!(map["date"], "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(map.get_all("x-amz-meta-tag").iter().count(), 2);
    }

    #[test]
    fn test_to_header_map_skips_malformed() {
        let raw = vec![("bad header", "x"), ("content-type", "text/plain")];

        let map = to_header_map(raw.into_iter());

        assert_eq!(map.len(), 1);
        assert_eq!(map["content-type"], "text/plain");
    }

    #[test]
    fn test_capture_starts_empty() {
        let capture = ResponseCapture::default();
        assert!(capture.take().is_none());
    }
}
