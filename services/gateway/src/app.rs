//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
use crate::api;
use crate::auth;
use crate::auth::identity::IdentityProvider;
use crate::auth::ticket::TicketService;
use crate::store::GatewayStore;
use axum::routing::{get, post};
use axum::{Router, middleware};
use relay_broker::TopicRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TopicRegistry>,
    pub store: Arc<dyn GatewayStore + Send + Sync>,
    pub identity: Arc<dyn IdentityProvider + Send + Sync>,
    pub tickets: TicketService,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    // Publisher surface: everything under /api runs behind the key guard.
    let api = Router::new()
        .route("/app/:app_id/ticket", post(api::ticket::create_ticket))
        .route(
            "/app/:app_id/topic/:topic/broadcast",
            post(api::broadcast::broadcast),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::api_key::require_api_key,
        ));

    Router::new()
        .route("/up", get(api::system::up))
        .nest("/api", api)
        .route("/ws/app/:app_id/topic/:topic", get(api::ws::attach))
        .layer(trace_layer)
        .with_state(state)
}
