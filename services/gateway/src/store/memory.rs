//! In-memory implementation of the gateway store.
//!
//! # Purpose
//! Implements [`GatewayStore`] with `HashMap`s behind `tokio::sync::RwLock`.
//! Used for local development and tests, and for deployments where the
//! application/key records are provisioned at startup and durability is not
//! required. All state is lost on restart.
use super::{GatewayStore, StoreError, StoreResult};
use crate::model::{ApiKey, Application};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    // Authoritative application records keyed by application id.
    applications: Arc<RwLock<HashMap<String, Application>>>,
    // Authoritative API key records keyed by key id. `keys_by_app` scans the
    // access lists; key counts are small enough that an index is not worth it.
    keys: Arc<RwLock<HashMap<String, ApiKey>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GatewayStore for InMemoryStore {
    async fn get_application(&self, app_id: &str) -> StoreResult<Application> {
        self.applications
            .read()
            .await
            .get(app_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("application {app_id}")))
    }

    async fn create_application(&self, application: Application) -> StoreResult<Application> {
        let mut applications = self.applications.write().await;
        if applications.contains_key(&application.id) {
            return Err(StoreError::Conflict(format!(
                "application {}",
                application.id
            )));
        }
        applications.insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn keys_by_app(&self, app_id: &str) -> StoreResult<Vec<ApiKey>> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .filter(|key| key.grants_access(app_id))
            .cloned()
            .collect())
    }

    async fn create_key(&self, key: ApiKey) -> StoreResult<ApiKey> {
        let mut keys = self.keys.write().await;
        if keys.contains_key(&key.id) {
            return Err(StoreError::Conflict(format!("api key {}", key.id)));
        }
        keys.insert(key.id.clone(), key.clone());
        Ok(key)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
