//! Identity provider abstraction and backends.
//!
//! # Purpose
//! Ticket signing is delegated to an external identity provider: the gateway
//! mints a custom token for a known user, and redemption exchanges that
//! custom token for an id token which is then verified. This module defines
//! the collaborator interface plus two backends:
//! - `local`: HS256 signer with an in-memory user directory, for development
//!   and tests
//! - `rest`: outbound client for a hosted provider (REST lookup/exchange,
//!   RS256 custom tokens, id-token verification against the provider's JWKS)
use crate::auth::ticket::TicketClaims;
use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("token rejected: {0}")]
    Rejected(String),
    #[error("identity provider unavailable: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile, IdentityError>;

    /// Sign a custom token carrying the ticket claims for `subject`.
    async fn mint_custom_token(
        &self,
        subject: &str,
        app_id: &str,
        topic: &str,
        ttl: Duration,
    ) -> Result<String, IdentityError>;

    /// Trade a custom token for an id token, rejecting expired or forged
    /// input.
    async fn exchange_custom_token(&self, custom_token: &str) -> Result<String, IdentityError>;

    /// Validate an id token and return its ticket claims.
    async fn verify_id_token(&self, id_token: &str) -> Result<TicketClaims, IdentityError>;
}

// Claims as they appear on the wire: issuer/audience envelope around the
// ticket claim set.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    iss: String,
    aud: String,
    #[serde(flatten)]
    ticket: TicketClaims,
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}

fn ticket_claims(subject: &str, app_id: &str, topic: &str, ttl: Duration) -> TicketClaims {
    let now = now_epoch_seconds();
    TicketClaims {
        sub: subject.to_string(),
        app_id: app_id.to_string(),
        topic: topic.to_string(),
        iat: now,
        exp: now + ttl.as_secs() as i64,
    }
}

const LOCAL_ISSUER: &str = "relay-local";
// Custom tokens and id tokens get distinct audiences so a ticket cannot be
// replayed directly as an id token without going through the exchange.
const CUSTOM_AUDIENCE: &str = "relay-identity";
const ID_AUDIENCE: &str = "relay-gateway";

/// HS256 identity backend with an in-memory user directory.
pub struct LocalIdentityProvider {
    secret: Vec<u8>,
    users: RwLock<HashMap<String, UserProfile>>,
}

impl LocalIdentityProvider {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_user(&self, user: UserProfile) {
        self.users
            .write()
            .expect("user directory lock poisoned")
            .insert(user.uid.clone(), user);
    }

    fn validation(audience: &str) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[LOCAL_ISSUER]);
        validation.leeway = 0;
        validation
    }

    fn sign(&self, claims: &WireClaims) -> Result<String, IdentityError> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|err| IdentityError::Upstream(format!("failed to sign token: {err}")))
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        self.users
            .read()
            .expect("user directory lock poisoned")
            .get(user_id)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(user_id.to_string()))
    }

    async fn mint_custom_token(
        &self,
        subject: &str,
        app_id: &str,
        topic: &str,
        ttl: Duration,
    ) -> Result<String, IdentityError> {
        self.sign(&WireClaims {
            iss: LOCAL_ISSUER.to_string(),
            aud: CUSTOM_AUDIENCE.to_string(),
            ticket: ticket_claims(subject, app_id, topic, ttl),
        })
    }

    async fn exchange_custom_token(&self, custom_token: &str) -> Result<String, IdentityError> {
        let data = decode::<WireClaims>(
            custom_token,
            &DecodingKey::from_secret(&self.secret),
            &Self::validation(CUSTOM_AUDIENCE),
        )
        .map_err(|err| IdentityError::Rejected(err.to_string()))?;
        self.sign(&WireClaims {
            iss: LOCAL_ISSUER.to_string(),
            aud: ID_AUDIENCE.to_string(),
            ticket: data.claims.ticket,
        })
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<TicketClaims, IdentityError> {
        let data = decode::<WireClaims>(
            id_token,
            &DecodingKey::from_secret(&self.secret),
            &Self::validation(ID_AUDIENCE),
        )
        .map_err(|err| IdentityError::Rejected(err.to_string()))?;
        Ok(data.claims.ticket)
    }
}

/// Configuration for the hosted identity provider backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RestIdentityConfig {
    /// Base URL of the provider's REST API.
    pub base_url: String,
    /// Issuer expected on id tokens and stamped on custom tokens.
    pub issuer: String,
    /// Audience expected on id tokens and stamped on custom tokens.
    pub audience: String,
    /// RS256 private key (PEM) the gateway signs custom tokens with.
    pub private_key_pem: String,
    /// Key id advertised in the custom token header, if the provider
    /// requires one.
    pub kid: Option<String>,
}

// JWKS document shape served by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub use_field: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

struct CachedJwks {
    jwks: Jwks,
    expires_at: Instant,
}

const JWKS_TTL: Duration = Duration::from_secs(3600);

/// REST-backed identity provider.
pub struct RestIdentityProvider {
    config: RestIdentityConfig,
    http: reqwest::Client,
    jwks: tokio::sync::RwLock<Option<CachedJwks>>,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    uid: String,
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponse {
    id_token: Option<String>,
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    message: String,
}

fn upstream(err: reqwest::Error) -> IdentityError {
    IdentityError::Upstream(err.to_string())
}

impl RestIdentityProvider {
    pub fn new(config: RestIdentityConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            jwks: tokio::sync::RwLock::new(None),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn cached_jwks(&self) -> Option<Jwks> {
        let guard = self.jwks.read().await;
        guard.as_ref().and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.jwks.clone())
            } else {
                None
            }
        })
    }

    async fn refresh_jwks(&self) -> Result<Jwks, IdentityError> {
        let jwks: Jwks = self
            .http
            .get(self.endpoint("/.well-known/jwks.json"))
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;
        *self.jwks.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            expires_at: Instant::now() + JWKS_TTL,
        });
        Ok(jwks)
    }

    async fn key_for(&self, kid: &str) -> Result<Jwk, IdentityError> {
        if let Some(jwks) = self.cached_jwks().await {
            if let Some(jwk) = find_key(&jwks, kid) {
                return Ok(jwk.clone());
            }
        }
        // Cache miss or unknown kid: the provider may have rotated keys.
        let refreshed = self.refresh_jwks().await?;
        find_key(&refreshed, kid)
            .cloned()
            .ok_or_else(|| IdentityError::Rejected(format!("unknown signing key {kid}")))
    }
}

fn find_key<'a>(jwks: &'a Jwks, kid: &str) -> Option<&'a Jwk> {
    jwks.keys.iter().find(|key| key.kid == kid)
}

fn decoding_key_for(jwk: &Jwk) -> Result<DecodingKey, IdentityError> {
    if jwk.kty != "RSA" {
        return Err(IdentityError::Rejected(format!(
            "unsupported key type {}",
            jwk.kty
        )));
    }
    DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
        .map_err(|err| IdentityError::Rejected(format!("invalid jwk: {err}")))
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        let response = self
            .http
            .post(self.endpoint("/v1/users:lookup"))
            .json(&LookupRequest { user_id })
            .send()
            .await
            .map_err(upstream)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(IdentityError::UserNotFound(user_id.to_string()));
        }
        let body: LookupResponse = response
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;
        Ok(UserProfile {
            uid: body.uid,
            email: body.email,
        })
    }

    async fn mint_custom_token(
        &self,
        subject: &str,
        app_id: &str,
        topic: &str,
        ttl: Duration,
    ) -> Result<String, IdentityError> {
        let signing_key = EncodingKey::from_rsa_pem(self.config.private_key_pem.as_bytes())
            .map_err(|err| IdentityError::Upstream(format!("invalid signing key: {err}")))?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.config.kid.clone();
        let claims = WireClaims {
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            ticket: ticket_claims(subject, app_id, topic, ttl),
        };
        encode(&header, &claims, &signing_key)
            .map_err(|err| IdentityError::Upstream(format!("failed to sign token: {err}")))
    }

    async fn exchange_custom_token(&self, custom_token: &str) -> Result<String, IdentityError> {
        let response = self
            .http
            .post(self.endpoint("/v1/token:exchange"))
            .json(&ExchangeRequest {
                token: custom_token,
            })
            .send()
            .await
            .map_err(upstream)?;
        if response.status().is_client_error() {
            return Err(IdentityError::Rejected(format!(
                "exchange refused: {}",
                response.status()
            )));
        }
        let body: ExchangeResponse = response
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;
        if let Some(error) = body.error {
            return Err(IdentityError::Rejected(error.message));
        }
        body.id_token
            .ok_or_else(|| IdentityError::Upstream("exchange response missing idToken".to_string()))
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<TicketClaims, IdentityError> {
        let header = decode_header(id_token).map_err(|err| {
            IdentityError::Rejected(format!("malformed token header: {err}"))
        })?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::Rejected("token missing kid".to_string()))?;
        let jwk = self.key_for(&kid).await?;
        let key = decoding_key_for(&jwk)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        let data = decode::<WireClaims>(id_token, &key, &validation)
            .map_err(|err| IdentityError::Rejected(err.to_string()))?;
        Ok(data.claims.ticket)
    }
}
