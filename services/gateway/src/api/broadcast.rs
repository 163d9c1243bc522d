//! Broadcast ingress.
//!
//! # Purpose
//! `POST /api/app/{app_id}/topic/{topic}/broadcast` serializes the request's
//! `Payload` field and enqueues it into the topic's broker. Lookup never
//! creates the topic: no live topic means no subscribers, which is reported
//! as not found rather than silently accepted.
use crate::api::error::{ApiError, api_not_found, api_validation_error};
use crate::app::AppState;
use crate::auth::api_key::ApiKeyContext;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bytes::Bytes;
use metrics::counter;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(rename = "Payload")]
    pub payload: serde_json::Value,
}

pub async fn broadcast(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiKeyContext>,
    Path((_app_id, topic)): Path<(String, String)>,
    Json(body): Json<BroadcastRequest>,
) -> Result<StatusCode, ApiError> {
    // The guard already pinned the app id; the path copy is only for routing.
    let topic = state
        .registry
        .get(&ctx.app_id, &topic)
        .ok_or_else(|| api_not_found("topic not found"))?;

    let payload = serde_json::to_vec(&body.payload)
        .map_err(|err| api_validation_error(&format!("failed to encode payload: {err}")))?;
    topic.broker().notify(Bytes::from(payload));
    counter!("gateway_broadcasts_total").increment(1);

    // Enqueueing is best-effort by design: even if the notifier slot
    // overwrites an unconsumed payload, the publisher is not penalized.
    Ok(StatusCode::NO_CONTENT)
}
