use chrono::Utc;
use gateway::app::AppState;
use gateway::auth::api_key::generate_api_key;
use gateway::auth::identity::{IdentityProvider, LocalIdentityProvider, UserProfile};
use gateway::auth::ticket::TicketService;
use gateway::model::{ApiKey, Application};
use gateway::store::GatewayStore;
use gateway::store::memory::InMemoryStore;
use relay_broker::TopicRegistry;
use std::sync::Arc;
use std::time::Duration;

pub struct TestContext {
    pub state: AppState,
    pub raw_key: String,
}

/// State seeded with application `app-a` (plus an empty `app-b`), one API
/// key scoped to `app-a`, and identity-provider user `user-1`.
pub async fn test_context(outbox_capacity: usize) -> TestContext {
    let store = Arc::new(InMemoryStore::new());
    store
        .create_application(Application::new("app-a", "owner-1", "App A"))
        .await
        .expect("seed app-a");
    store
        .create_application(Application::new("app-b", "owner-1", "App B"))
        .await
        .expect("seed app-b");

    // MIN_COST keeps the deliberately slow hash fast enough for tests.
    let generated = generate_api_key(4u32).expect("generate key");
    store
        .create_key(ApiKey {
            id: "key-1".to_string(),
            owner_user_id: "owner-1".to_string(),
            key_hash: generated.hash.clone(),
            key_preview: generated.preview.clone(),
            created_at: Utc::now(),
            updated_at: None,
            access: vec!["app-a".to_string()],
        })
        .await
        .expect("seed key");

    let identity = Arc::new(LocalIdentityProvider::new(b"gateway-test-secret"));
    identity.insert_user(UserProfile {
        uid: "user-1".to_string(),
        email: Some("user@example.com".to_string()),
    });
    let identity: Arc<dyn IdentityProvider + Send + Sync> = identity;

    let state = AppState {
        registry: Arc::new(TopicRegistry::new(outbox_capacity)),
        store,
        identity: identity.clone(),
        tickets: TicketService::new(identity, Duration::from_secs(300)),
    };
    TestContext {
        state,
        raw_key: generated.raw,
    }
}
