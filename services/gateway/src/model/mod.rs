//! Gateway data model.
//!
//! # Purpose
//! Persistent records the gateway consumes: applications (tenants) and the
//! API keys that authenticate their publishers.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant application. Owns topics and API keys; the `id` is the namespace
/// every topic and key is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Application {
    pub fn new(
        id: impl Into<String>,
        owner_user_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_user_id: owner_user_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// A long-lived publisher credential. Only the slow hash is stored; the raw
/// key is shown once at creation time. `access` lists the application ids the
/// key may publish for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub owner_user_id: String,
    pub key_hash: String,
    pub key_preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub access: Vec<String>,
}

impl ApiKey {
    pub fn grants_access(&self, app_id: &str) -> bool {
        self.access.iter().any(|granted| granted == app_id)
    }
}
