//! Liveness endpoint.
use crate::api::error::{ApiError, api_internal};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

pub async fn up(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
