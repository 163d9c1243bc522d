mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::test_context;
use gateway::app::build_router;
use gateway::model::ApiKey;
use gateway::store::GatewayStore;
use tower::ServiceExt;

fn json_request(method: &str, uri: &str, auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = auth {
        builder = builder.header("authorization", key);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn up_reports_ok() {
    let ctx = test_context(8).await;
    let app = build_router(ctx.state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/up")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["status"], "ok");
}

#[tokio::test]
async fn ticket_requires_an_api_key() {
    let ctx = test_context(8).await;
    let request = json_request(
        "POST",
        "/api/app/app-a/ticket",
        None,
        serde_json::json!({"userId": "user-1", "topic": "room"}),
    );
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ticket_rejects_an_unknown_key() {
    let ctx = test_context(8).await;
    let request = json_request(
        "POST",
        "/api/app/app-a/ticket",
        Some("rk_definitely_not_issued"),
        serde_json::json!({"userId": "user-1", "topic": "room"}),
    );
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn key_scoped_to_another_app_is_rejected() {
    let ctx = test_context(8).await;
    // The key is valid for app-a, but the request targets app-b.
    let request = json_request(
        "POST",
        "/api/app/app-b/ticket",
        Some(&ctx.raw_key),
        serde_json::json!({"userId": "user-1", "topic": "room"}),
    );
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ticket_validates_request_fields() {
    let ctx = test_context(8).await;
    for body in [
        serde_json::json!({"userId": "", "topic": "room"}),
        serde_json::json!({"userId": "user-1", "topic": ""}),
    ] {
        let request = json_request("POST", "/api/app/app-a/ticket", Some(&ctx.raw_key), body);
        let response = build_router(ctx.state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn ticket_for_an_unknown_user_is_not_found() {
    let ctx = test_context(8).await;
    let request = json_request(
        "POST",
        "/api/app/app-a/ticket",
        Some(&ctx.raw_key),
        serde_json::json!({"userId": "ghost", "topic": "room"}),
    );
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "user not found");
}

#[tokio::test]
async fn ticket_for_an_unknown_application_is_not_found() {
    let ctx = test_context(8).await;
    // A key scoped to an app id that has no application record behind it.
    let generated = gateway::auth::api_key::generate_api_key(4u32).expect("generate");
    ctx.state
        .store
        .create_key(ApiKey {
            id: "key-ghost".to_string(),
            owner_user_id: "owner-1".to_string(),
            key_hash: generated.hash,
            key_preview: generated.preview,
            created_at: Utc::now(),
            updated_at: None,
            access: vec!["ghost-app".to_string()],
        })
        .await
        .expect("seed key");

    let request = json_request(
        "POST",
        "/api/app/ghost-app/ticket",
        Some(&generated.raw),
        serde_json::json!({"userId": "user-1", "topic": "room"}),
    );
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "application not found");
}

#[tokio::test]
async fn issued_ticket_round_trips_through_verification() {
    let ctx = test_context(8).await;
    let request = json_request(
        "POST",
        "/api/app/app-a/ticket",
        Some(&ctx.raw_key),
        serde_json::json!({"userId": "user-1", "topic": "room"}),
    );
    let response = build_router(ctx.state.clone())
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    let token = payload["token"].as_str().expect("token");
    assert!(!token.is_empty());

    let claims = ctx.state.tickets.verify(token).await.expect("verify");
    assert_eq!(claims.sub, "user-1");
    assert_eq!(claims.app_id, "app-a");
    assert_eq!(claims.topic, "room");
}

#[tokio::test]
async fn broadcast_to_an_absent_topic_is_not_found() {
    let ctx = test_context(8).await;
    let request = json_request(
        "POST",
        "/api/app/app-a/topic/empty-room/broadcast",
        Some(&ctx.raw_key),
        serde_json::json!({"Payload": {"n": 1}}),
    );
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "topic not found");
}

#[tokio::test]
async fn broadcast_rejects_a_malformed_body() {
    let ctx = test_context(8).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/app/app-a/topic/room/broadcast")
        .header("content-type", "application/json")
        .header("authorization", &ctx.raw_key)
        .body(Body::from("{not json"))
        .expect("request");
    let response = build_router(ctx.state)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
