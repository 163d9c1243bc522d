//! Subscriber ticket minting and verification.
//!
//! # Purpose
//! A ticket is a short-lived signed credential a publisher requests for one
//! end user and one topic; the end user redeems it to open a WebSocket. The
//! signing authority is the external identity provider; this module only
//! fixes the claim shape and the redemption flow (custom token in, verified
//! id token claims out).
use crate::auth::identity::{IdentityError, IdentityProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Claims carried by every ticket. `app_id` and `topic` pin the credential
/// to exactly one broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    pub sub: String,
    pub app_id: String,
    pub topic: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TicketService {
    identity: Arc<dyn IdentityProvider + Send + Sync>,
    ttl: Duration,
}

impl TicketService {
    pub fn new(identity: Arc<dyn IdentityProvider + Send + Sync>, ttl: Duration) -> Self {
        Self { identity, ttl }
    }

    /// Mint a ticket for `subject` scoped to `(app_id, topic)`.
    pub async fn mint(
        &self,
        subject: &str,
        app_id: &str,
        topic: &str,
    ) -> Result<String, IdentityError> {
        self.identity
            .mint_custom_token(subject, app_id, topic, self.ttl)
            .await
    }

    /// Redeem a ticket: exchange it for an id token, verify that token, and
    /// require both scoping claims to be present.
    pub async fn verify(&self, ticket: &str) -> Result<TicketClaims, IdentityError> {
        let id_token = self.identity.exchange_custom_token(ticket).await?;
        let claims = self.identity.verify_id_token(&id_token).await?;
        if claims.app_id.is_empty() {
            return Err(IdentityError::Rejected("missing app_id claim".to_string()));
        }
        if claims.topic.is_empty() {
            return Err(IdentityError::Rejected("missing topic claim".to_string()));
        }
        Ok(claims)
    }
}
