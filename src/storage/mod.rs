pub mod memory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::delegation::PermissionScope;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMethod {
    Get,
    Put,
}

/// One outbound object operation
#[derive(Debug, Clone)]
pub struct StorageRequest {
    pub method: StorageMethod,
    pub bucket: String,
    pub key: String,
    /// Headers forwarded unchanged from the inbound request
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Delegated scope the call executes under
    pub scope: PermissionScope,
}

/// Status, headers and body exactly as the store returned them
#[derive(Debug, Clone)]
pub struct StorageResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// An object store the proxy forwards to
///
/// Any response the store produced, whatever its status, is `Ok`. `Err` is
/// reserved for calls that produced no response at all.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn execute(&self, request: StorageRequest) -> Result<StorageResponse>;

    fn backend(&self) -> &'static str;
}

/// Build the store selected by the configuration
pub async fn from_config(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::from_config(config).await?),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory object store; objects are lost on restart");
            Arc::new(MemoryObjectStore::new())
        }
    };
    Ok(store)
}
