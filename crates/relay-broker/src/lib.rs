// In-process fan-out fabric.
// Each topic runs exactly one dispatch task that owns the subscriber set;
// the registry owns topic lifecycle (lazy create on attach, teardown on the
// detach that empties the topic).
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod broker;
pub mod registry;
pub mod topic;

pub use broker::{Broker, Outbox};
pub use registry::TopicRegistry;
pub use topic::Topic;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("topic not found: app={app_id} topic={topic}")]
    TopicNotFound { app_id: String, topic: String },
    #[error("dispatch loop stopped")]
    Stopped,
}

/// Identity of a broadcast channel: one topic name scoped to one application.
///
/// Renders as `app_id:topic`, which is also the wire/registry form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId {
    app_id: String,
    topic: String,
}

impl TopicId {
    pub fn new(app_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            topic: topic.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_id, self.topic)
    }
}

/// Identity of one attached subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
