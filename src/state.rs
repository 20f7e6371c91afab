use crate::config::Config;
use crate::proxy::ProxyRouter;
use crate::routes::RouteTable;
use crate::storage::ObjectStore;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyRouter>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, table: RouteTable, store: Arc<dyn ObjectStore>) -> Self {
        let proxy = ProxyRouter::new(
            table,
            config.bucket_name.clone(),
            store,
            config.storage_timeout,
        );
        Self {
            proxy: Arc::new(proxy),
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
impl AppState {
    /// Default configuration with the declared routes over `store`
    pub fn for_tests(store: Arc<dyn ObjectStore>) -> Self {
        let config = Config::from_lookup(|name| match name {
            "STORAGE_BACKEND" => Some("memory".to_string()),
            "BUCKET_NAME" => Some("test-bucket".to_string()),
            _ => None,
        })
        .expect("test config");
        let table = RouteTable::declared().expect("declared routes are valid");
        Self::new(config, table, store)
    }
}
