use crate::model::{ApiKey, Application};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write boundary for the records the gateway consumes. The hot path
/// only ever calls `keys_by_app`; the rest exists for provisioning and tests.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_application(&self, app_id: &str) -> StoreResult<Application>;
    async fn create_application(&self, application: Application) -> StoreResult<Application>;

    /// All API keys whose access list includes `app_id`.
    async fn keys_by_app(&self, app_id: &str) -> StoreResult<Vec<ApiKey>>;
    async fn create_key(&self, key: ApiKey) -> StoreResult<ApiKey>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
