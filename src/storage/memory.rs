use anyhow::Result;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{ObjectStore, StorageMethod, StorageRequest, StorageResponse};
use crate::delegation::PermissionScope;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: HeaderValue,
    last_modified: DateTime<Utc>,
}

/// Process-local object store answering the way S3 does: `Date` and request
/// id on every response, `NoSuchKey` for absent objects and `AccessDenied`
/// for writes under a read scope.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, bucket: &str, key: &str) -> Result<StorageResponse> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow::anyhow!("object map lock poisoned"))?;

        match objects.get(&(bucket.to_string(), key.to_string())) {
            Some(object) => {
                let mut headers = base_headers();
                headers.insert(header::CONTENT_TYPE, object.content_type.clone());
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.body.len()));
                if let Ok(value) = HeaderValue::from_str(&http_date(object.last_modified)) {
                    headers.insert(header::LAST_MODIFIED, value);
                }
                tracing::debug!("Read object {}/{}", bucket, key);
                Ok(StorageResponse {
                    status: 200,
                    headers,
                    body: object.body.clone(),
                })
            }
            None => {
                tracing::debug!("Object not found {}/{}", bucket, key);
                Ok(error_response(404, "NoSuchKey", "The specified key does not exist."))
            }
        }
    }

    fn put(&self, bucket: &str, key: &str, headers: &HeaderMap, body: Bytes) -> Result<StorageResponse> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

        self.objects
            .write()
            .map_err(|_| anyhow::anyhow!("object map lock poisoned"))?
            .insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    body,
                    content_type,
                    last_modified: Utc::now(),
                },
            );

        tracing::debug!("Stored object {}/{}", bucket, key);
        let mut headers = base_headers();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0));
        Ok(StorageResponse {
            status: 200,
            headers,
            body: Bytes::new(),
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn execute(&self, request: StorageRequest) -> Result<StorageResponse> {
        match request.method {
            StorageMethod::Get => self.get(&request.bucket, &request.key),
            StorageMethod::Put if request.scope == PermissionScope::Read => {
                Ok(error_response(403, "AccessDenied", "Access Denied"))
            }
            StorageMethod::Put => {
                self.put(&request.bucket, &request.key, &request.headers, request.body)
            }
        }
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// RFC 7231 IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(date) = HeaderValue::from_str(&http_date(Utc::now())) {
        headers.insert(header::DATE, date);
    }
    if let Ok(request_id) = HeaderValue::from_str(&Uuid::new_v4().simple().to_string()) {
        headers.insert(HeaderName::from_static("x-amz-request-id"), request_id);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("AmazonS3"));
    headers
}

fn error_response(status: u16, code: &str, message: &str) -> StorageResponse {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message></Error>",
        code, message
    );
    let mut headers = base_headers();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    StorageResponse {
        status,
        headers,
        body: Bytes::from(body),
    }
}
