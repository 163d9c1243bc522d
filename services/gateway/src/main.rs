// Relay Gateway
// -------------
// Single-process, multi-tenant WebSocket fan-out gateway. Server-side
// publishers authenticate with an API key to mint subscriber tickets and to
// broadcast; end users redeem tickets over `/ws/...` and receive every
// payload broadcast to their `(application, topic)` channel, in dispatch
// order, until they disconnect or fall too far behind.
//
// Process layout:
// - one axum listener for the API + WebSocket surface
// - one axum listener for Prometheus metrics
// - one dispatch task per live topic inside `relay-broker`, created on first
//   attach and cancelled when the last subscriber detaches
use anyhow::Context;
use gateway::app::{AppState, build_router};
use gateway::auth::identity::{
    IdentityProvider, LocalIdentityProvider, RestIdentityProvider,
};
use gateway::auth::ticket::TicketService;
use gateway::config::{GatewayConfig, IdentityBackend};
use gateway::observability;
use gateway::store::GatewayStore;
use gateway::store::memory::InMemoryStore;
use relay_broker::TopicRegistry;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let metrics_handle = observability::init_observability();

    let config = GatewayConfig::from_env_or_yaml().context("gateway config")?;

    let store: Arc<dyn GatewayStore + Send + Sync> = Arc::new(InMemoryStore::new());
    tracing::info!(backend = store.backend_name(), "gateway store ready");

    let identity: Arc<dyn IdentityProvider + Send + Sync> = match &config.identity {
        IdentityBackend::Local { secret } => {
            tracing::warn!("local identity backend in use; tickets are signed with a shared secret");
            Arc::new(LocalIdentityProvider::new(secret.as_bytes()))
        }
        IdentityBackend::Rest(rest) => Arc::new(RestIdentityProvider::new(rest.clone())),
    };

    let registry = Arc::new(TopicRegistry::new(config.outbox_capacity));
    let tickets = TicketService::new(
        identity.clone(),
        Duration::from_secs(config.ticket_ttl_secs),
    );
    let state = AppState {
        registry: registry.clone(),
        store,
        identity,
        tickets,
    };

    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "gateway listening");

    // Open WebSockets keep the server's drain phase alive, so topic teardown
    // has to run concurrently with it: cancelling the topic lifetimes closes
    // every outbox, which unwinds the writer tasks and lets the remaining
    // connections finish.
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let drainer = tokio::spawn({
        let registry = registry.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received; draining topics");
            registry.shutdown(grace).await;
        }
    });

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = drainer.await;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
