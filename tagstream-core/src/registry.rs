//! Long-lived stores keyed by backend name.
//!
//! Operator templates may target any configured backend. Stores opened here
//! stay connected until closed, so repeated executions against the same
//! backend reuse its pool. They run without a cache.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::NoCache;
use crate::config::Settings;
use crate::error::Result;
use crate::storage::{Connector, DriverConnector};
use crate::store::Store;

pub struct StoreRegistry {
    settings: Arc<Settings>,
    connector: Arc<dyn Connector>,
    stores: Mutex<HashMap<String, Arc<Store>>>,
}

impl StoreRegistry {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_connector(settings, Arc::new(DriverConnector))
    }

    pub fn with_connector(settings: Arc<Settings>, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the store for `name`, connecting it on first use.
    pub async fn open(&self, name: &str) -> Result<Arc<Store>> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }
        self.settings.backend(name)?;

        let store = Arc::new(Store::with_connector(
            Arc::clone(&self.settings),
            Arc::clone(&self.connector),
        ));
        store.connect(name, Arc::new(NoCache)).await?;
        stores.insert(name.to_string(), Arc::clone(&store));
        info!(backend = name, open = stores.len(), "registered store");
        Ok(store)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Store>> {
        self.stores.lock().await.get(name).cloned()
    }

    pub async fn close(&self, name: &str) {
        let store = self.stores.lock().await.remove(name);
        if let Some(store) = store {
            store.disconnect().await;
        }
    }

    pub async fn close_all(&self) {
        let stores: Vec<_> = self.stores.lock().await.drain().collect();
        for (_, store) in stores {
            store.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::test_util::{mock_conn, settings, StaticConnector};

    #[tokio::test]
    async fn test_open_is_idempotent() {
        // StaticConnector hands out a single connection, so a second connect would fail
        let registry = StoreRegistry::with_connector(settings(), StaticConnector::new(mock_conn()));
        let first = registry.open("mock").await.unwrap();
        let second = registry.open("mock").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get("mock").await.is_some());

        registry.close("mock").await;
        assert!(registry.get("mock").await.is_none());
        assert!(!first.is_connected().await);
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let registry = StoreRegistry::with_connector(settings(), StaticConnector::new(mock_conn()));
        assert!(matches!(
            registry.open("nope").await,
            Err(StoreError::BackendNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = StoreRegistry::with_connector(settings(), StaticConnector::new(mock_conn()));
        let store = registry.open("mock").await.unwrap();
        registry.close_all().await;
        assert!(!store.is_connected().await);
        assert!(registry.get("mock").await.is_none());
    }
}
