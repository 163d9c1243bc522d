//! Ticket issuance endpoint.
//!
//! # Purpose
//! `POST /api/app/{app_id}/ticket` lets an authenticated publisher request a
//! subscriber credential for one of its end users and one topic. The user
//! must exist at the identity provider; the ticket pins the `(app_id, topic)`
//! pair the WebSocket attach will be allowed to claim.
use crate::api::error::{
    ApiError, api_internal, api_internal_message, api_not_found, api_validation_error,
};
use crate::app::AppState;
use crate::auth::api_key::ApiKeyContext;
use crate::auth::identity::IdentityError;
use crate::store::StoreError;
use axum::extract::State;
use axum::{Extension, Json};
use metrics::counter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTicketResponse {
    pub token: String,
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiKeyContext>,
    Json(body): Json<CreateTicketRequest>,
) -> Result<Json<CreateTicketResponse>, ApiError> {
    if body.user_id.is_empty() {
        return Err(api_validation_error("empty user id"));
    }
    if body.topic.is_empty() {
        return Err(api_validation_error("empty topic"));
    }

    // The guard proved the key may act for this app; the record must still
    // exist before we mint credentials scoped to it.
    match state.store.get_application(&ctx.app_id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => return Err(api_not_found("application not found")),
        Err(err) => return Err(api_internal("failed to load application", &err)),
    }

    let user = match state.identity.get_user(&body.user_id).await {
        Ok(user) => user,
        Err(IdentityError::UserNotFound(_)) => return Err(api_not_found("user not found")),
        Err(err) => {
            tracing::error!(error = %err, user_id = %body.user_id, "user lookup failed");
            return Err(api_internal_message("identity provider unavailable"));
        }
    };

    let token = state
        .tickets
        .mint(&user.uid, &ctx.app_id, &body.topic)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, app_id = %ctx.app_id, "ticket mint failed");
            api_internal_message("failed to mint ticket")
        })?;

    counter!("gateway_tickets_issued_total").increment(1);
    Ok(Json(CreateTicketResponse { token }))
}
