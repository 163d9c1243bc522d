//! Publisher authentication.
//!
//! # Purpose
//! Middleware that authenticates `/api` requests by comparing the raw
//! `Authorization` header against the stored slow hashes of every key scoped
//! to the path's application. bcrypt keeps the comparison constant-time and
//! deliberately expensive; callers are expected to reuse connections.
use crate::api::error::{ApiError, api_internal, api_internal_message, api_unauthorized, api_validation_error};
use crate::app::AppState;
use crate::model::ApiKey;
use axum::extract::{Path, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use metrics::counter;
use rand::RngCore;
use std::collections::HashMap;

/// Request-scoped result of a successful key check, made available to
/// handlers through the request extensions.
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub key_id: String,
    pub app_id: String,
}

pub async fn require_api_key(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(app_id) = params.get("app_id").cloned() else {
        return Err(api_validation_error("missing app id"));
    };
    let raw = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| api_unauthorized("missing api key"))?;

    let candidates = state
        .store
        .keys_by_app(&app_id)
        .await
        .map_err(|err| api_internal("failed to load api keys", &err))?;

    // bcrypt verification is intentionally slow; keep it off the async
    // workers so a burst of publisher requests cannot starve the runtime.
    let matched = tokio::task::spawn_blocking(move || find_matching_key(candidates, &raw))
        .await
        .map_err(|_| api_internal_message("api key verification failed"))?;

    let Some(key) = matched else {
        counter!("gateway_api_key_rejected_total").increment(1);
        return Err(api_unauthorized("invalid api key"));
    };
    request.extensions_mut().insert(ApiKeyContext {
        key_id: key.id,
        app_id,
    });
    Ok(next.run(request).await)
}

fn find_matching_key(candidates: Vec<ApiKey>, raw: &str) -> Option<ApiKey> {
    candidates
        .into_iter()
        .find(|key| bcrypt::verify(raw, &key.key_hash).unwrap_or(false))
}

/// Raw key material produced for an operator at provisioning time. Only the
/// hash and preview are ever stored.
#[derive(Debug)]
pub struct GeneratedKey {
    pub raw: String,
    pub hash: String,
    pub preview: String,
}

pub fn generate_api_key(cost: u32) -> anyhow::Result<GeneratedKey> {
    let mut material = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut material);
    let raw = format!("rk_{}", hex::encode(material));
    let hash = bcrypt::hash(&raw, cost)?;
    let preview = format!("{}…", &raw[..8]);
    Ok(GeneratedKey { raw, hash, preview })
}
