//! Registry of live topics.
//!
//! # Purpose
//! Thread-safe map from `(app_id, topic)` to a live [`Topic`]. Topics are
//! created lazily by the subscriber attach path and destroyed by the detach
//! that empties them. The registry owns the destruction decision: the
//! emptiness check and the removal happen atomically under the registry
//! write lock, so a concurrent attach either reuses the still-live topic or
//! creates a fresh one; it is never handed a cancelled topic.
use crate::topic::Topic;
use crate::{ClientId, TopicId};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub struct TopicRegistry {
    outbox_capacity: usize,
    topics: RwLock<HashMap<TopicId, Arc<Topic>>>,
}

impl TopicRegistry {
    /// `outbox_capacity` bounds each subscriber's outbox; a subscriber that
    /// falls that far behind is disconnected by the dispatch task.
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            outbox_capacity,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Publisher-side lookup. Never creates: an absent topic means no
    /// subscribers, which the broadcast endpoint reports as not found.
    pub fn get(&self, app_id: &str, topic: &str) -> Option<Arc<Topic>> {
        self.topics
            .read()
            .expect("registry lock poisoned")
            .get(&TopicId::new(app_id, topic))
            .cloned()
    }

    /// Subscriber-side lookup: create the topic if absent (starting its
    /// dispatch task) and record the client, all under the write lock so the
    /// returned topic cannot have been torn down underneath the caller.
    pub fn attach(&self, app_id: &str, topic: &str, client: ClientId) -> Arc<Topic> {
        let id = TopicId::new(app_id, topic);
        let mut topics = self.topics.write().expect("registry lock poisoned");
        let entry = topics.entry(id.clone()).or_insert_with(|| {
            counter!("broker_topics_created_total").increment(1);
            tracing::info!(topic = %id, "topic created");
            Topic::new(id.clone(), self.outbox_capacity)
        });
        entry.add_client(client);
        let result = entry.clone();
        gauge!("broker_topics").set(topics.len() as f64);
        gauge!("broker_clients").increment(1.0);
        result
    }

    /// Remove one client; if that empties the topic, cancel its lifetime and
    /// erase it. Idempotent against a topic that was already torn down (for
    /// instance by shutdown): the pointer comparison makes sure a freshly
    /// recreated topic under the same id is left alone.
    pub fn detach(&self, topic: &Arc<Topic>, client: &ClientId) {
        let mut topics = self.topics.write().expect("registry lock poisoned");
        let emptied = topic.remove_client(client);
        gauge!("broker_clients").decrement(1.0);
        if emptied {
            if let Some(live) = topics.get(topic.id()) {
                if Arc::ptr_eq(live, topic) {
                    topic.cancel();
                    topics.remove(topic.id());
                    tracing::info!(topic = %topic.id(), "topic removed");
                }
            }
        }
        gauge!("broker_topics").set(topics.len() as f64);
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().expect("registry lock poisoned").len()
    }

    /// Tear down every topic and wait for the dispatch tasks to stop, each
    /// within `grace`. Used on process shutdown after the listener has
    /// stopped accepting connections.
    pub async fn shutdown(&self, grace: Duration) {
        let drained: Vec<Arc<Topic>> = {
            let mut topics = self.topics.write().expect("registry lock poisoned");
            topics.drain().map(|(_, topic)| topic).collect()
        };
        for topic in &drained {
            topic.cancel();
        }
        for topic in drained {
            if let Some(task) = topic.take_dispatch() {
                if tokio::time::timeout(grace, task).await.is_err() {
                    tracing::warn!(topic = %topic.id(), "dispatch task did not stop in time");
                }
            }
        }
        gauge!("broker_topics").set(0.0);
        gauge!("broker_clients").set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::time::timeout;

    #[tokio::test]
    async fn get_returns_none_for_absent_topic() {
        let registry = TopicRegistry::new(8);
        assert!(registry.get("app", "room").is_none());
    }

    #[tokio::test]
    async fn attach_creates_topic_and_get_finds_it() {
        let registry = TopicRegistry::new(8);
        let client = ClientId::new();
        let topic = registry.attach("app", "room", client);
        assert_eq!(topic.client_count(), 1);
        let found = registry.get("app", "room").expect("topic");
        assert!(Arc::ptr_eq(&topic, &found));
        assert_eq!(registry.topic_count(), 1);
    }

    #[tokio::test]
    async fn topics_are_scoped_per_application() {
        let registry = TopicRegistry::new(8);
        let a = registry.attach("app-a", "room", ClientId::new());
        let b = registry.attach("app-b", "room", ClientId::new());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.topic_count(), 2);
    }

    #[tokio::test]
    async fn last_detach_tears_the_topic_down() {
        let registry = TopicRegistry::new(8);
        let client = ClientId::new();
        let topic = registry.attach("app", "room", client);
        let mut outbox = topic.broker().attach().await.expect("attach");

        registry.detach(&topic, &client);
        assert!(registry.get("app", "room").is_none());
        assert!(topic.is_cancelled());
        // Cancellation closes the outbox, so the writer side unwinds.
        let closed = timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("recv timed out");
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn topic_survives_while_other_clients_remain() {
        let registry = TopicRegistry::new(8);
        let first = ClientId::new();
        let second = ClientId::new();
        let topic = registry.attach("app", "room", first);
        registry.attach("app", "room", second);
        assert_eq!(topic.client_count(), 2);

        registry.detach(&topic, &first);
        assert!(!topic.is_cancelled());
        assert_eq!(registry.topic_count(), 1);

        let mut outbox = topic.broker().attach().await.expect("attach");
        topic.broker().notify(Bytes::from_static(b"still here"));
        let payload = timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("recv timed out");
        assert_eq!(payload, Some(Bytes::from_static(b"still here")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn attach_detach_storm_never_hands_out_a_cancelled_topic() {
        let registry = Arc::new(TopicRegistry::new(8));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let client = ClientId::new();
                    let topic = registry.attach("app", "hot", client);
                    // While our client is attached the topic cannot empty,
                    // so the registry must never have cancelled it.
                    assert!(!topic.is_cancelled());
                    let outbox = topic.broker().attach().await.expect("broker attach");
                    topic.broker().detach(outbox.id());
                    registry.detach(&topic, &client);
                }
            }));
        }
        for task in tasks {
            task.await.expect("storm task");
        }
        assert_eq!(registry.topic_count(), 0);
        assert!(registry.get("app", "hot").is_none());
    }

    #[tokio::test]
    async fn shutdown_cancels_every_topic() {
        let registry = TopicRegistry::new(8);
        let topic_a = registry.attach("app", "a", ClientId::new());
        let topic_b = registry.attach("app", "b", ClientId::new());
        let mut outbox = topic_a.broker().attach().await.expect("attach");

        registry.shutdown(Duration::from_secs(1)).await;
        assert_eq!(registry.topic_count(), 0);
        assert!(topic_a.is_cancelled());
        assert!(topic_b.is_cancelled());
        let closed = timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("recv timed out");
        assert_eq!(closed, None);
    }
}
