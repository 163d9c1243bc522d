//! WebSocket attach handler.
//!
//! # Purpose
//! `GET /ws/app/{app_id}/topic/{topic}?token=` redeems a ticket, upgrades
//! the connection, and binds the client to its topic. Each client runs two
//! tasks: a writer draining the broker outbox into the socket and a reader
//! discarding inbound frames (the protocol is server-push only). Whichever
//! side fails first, the client is detached from both the broker's
//! subscriber map and the topic's client set before the socket is dropped.
use crate::api::error::{ApiError, api_internal_message, api_validation_error};
use crate::app::AppState;
use crate::auth::identity::IdentityError;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use relay_broker::{ClientId, TopicRegistry};
use serde::Deserialize;
use std::sync::Arc;

/// Response header carrying the client id assigned at upgrade time.
pub const WS_ID_HEADER: &str = "ws-id";

#[derive(Debug, Deserialize)]
pub struct AttachQuery {
    pub token: String,
}

pub async fn attach(
    State(state): State<AppState>,
    Path((app_id, topic)): Path<(String, String)>,
    Query(query): Query<AttachQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = match state.tickets.verify(&query.token).await {
        Ok(claims) => claims,
        Err(IdentityError::Rejected(reason)) => {
            tracing::warn!(%reason, "ticket rejected");
            return Err(api_validation_error("invalid ticket"));
        }
        Err(IdentityError::UserNotFound(_)) => {
            return Err(api_validation_error("invalid ticket"));
        }
        Err(IdentityError::Upstream(reason)) => {
            tracing::error!(%reason, "identity provider failure during attach");
            return Err(api_internal_message("identity provider unavailable"));
        }
    };

    // A ticket only admits the exact channel it was minted for.
    if claims.app_id != app_id {
        return Err(api_validation_error("app id claim mismatch"));
    }
    if claims.topic != topic {
        return Err(api_validation_error("topic claim mismatch"));
    }

    let client_id = ClientId::new();
    let registry = state.registry.clone();
    let subject = claims.sub;
    let mut response =
        ws.on_upgrade(move |socket| run_client(socket, registry, app_id, topic, client_id, subject));
    if let Ok(value) = HeaderValue::from_str(&client_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(WS_ID_HEADER), value);
    }
    Ok(response)
}

async fn run_client(
    socket: WebSocket,
    registry: Arc<TopicRegistry>,
    app_id: String,
    topic_name: String,
    client_id: ClientId,
    subject: String,
) {
    let topic = registry.attach(&app_id, &topic_name, client_id);
    let outbox = match topic.broker().attach().await {
        Ok(outbox) => outbox,
        Err(err) => {
            tracing::error!(error = %err, topic = %topic.id(), "broker attach failed");
            registry.detach(&topic, &client_id);
            return;
        }
    };
    let outbox_id = outbox.id();
    counter!("gateway_ws_connections_total").increment(1);
    tracing::info!(client = %client_id, topic = %topic.id(), %subject, "client attached");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut outbox = outbox;
        while let Some(payload) = outbox.recv().await {
            let frame = Message::Text(String::from_utf8_lossy(&payload).into_owned());
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Inbound frames are read only to drive connection liveness; their
    // contents are discarded.
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    // Both detach steps run no matter which side terminated first.
    topic.broker().detach(outbox_id);
    registry.detach(&topic, &client_id);
    counter!("gateway_ws_disconnections_total").increment(1);
    tracing::info!(client = %client_id, topic = %topic.id(), "client detached");
}
