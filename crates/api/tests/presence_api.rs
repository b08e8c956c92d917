//! Integration tests for presence webhook ingress.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, post_json, post_raw};
use herald_engine::OnlineSetStore;
use serde_json::json;

const WEBHOOK: &str = "/api/v1/presence/webhook";

/// Poll until the ingest loop has applied the expected state.
async fn wait_for_online(app: &common::TestApp, channel: &str, recipient: &str, expected: bool) {
    for _ in 0..100 {
        if app.store.is_online(channel, recipient).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{recipient} on {channel} never became online={expected}");
}

// ---------------------------------------------------------------------------
// Test: join webhook is accepted and applied
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_webhook_is_accepted_and_marks_recipient_online() {
    let app = common::build_test_app();

    let response = post_json(
        app.router(),
        WEBHOOK,
        json!({"action": "join", "channel": "game.u42", "uuid": "u42", "occupancy": 1}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    wait_for_online(&app, "game.u42", "u42", true).await;
}

// ---------------------------------------------------------------------------
// Test: leave webhook removes a previously joined recipient
// ---------------------------------------------------------------------------

#[tokio::test]
async fn leave_webhook_marks_recipient_offline() {
    let app = common::build_test_app();

    post_json(
        app.router(),
        WEBHOOK,
        json!({"action": "join", "channel": "lobby", "uuid": "u1"}),
    )
    .await;
    wait_for_online(&app, "lobby", "u1", true).await;

    let response = post_json(
        app.router(),
        WEBHOOK,
        json!({"action": "leave", "channel": "lobby", "uuid": "u1"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    wait_for_online(&app, "lobby", "u1", false).await;
}

// ---------------------------------------------------------------------------
// Test: interval webhook applies joins and departures together
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interval_webhook_applies_batch() {
    let app = common::build_test_app();

    post_json(
        app.router(),
        WEBHOOK,
        json!({"action": "join", "channel": "room", "uuid": "gone"}),
    )
    .await;
    wait_for_online(&app, "room", "gone", true).await;

    let response = post_json(
        app.router(),
        WEBHOOK,
        json!({
            "action": "interval",
            "channel": "room",
            "join": ["a", "b"],
            "timeout": ["gone"],
            "occupancy": 2,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    wait_for_online(&app, "room", "b", true).await;
    wait_for_online(&app, "room", "a", true).await;
    wait_for_online(&app, "room", "gone", false).await;
}

// ---------------------------------------------------------------------------
// Test: malformed and invalid webhooks are rejected with 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_json_returns_400() {
    let app = common::build_test_app();

    let response = post_raw(app.router(), WEBHOOK, "{not json").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_action_returns_400_and_counts_drop() {
    let app = common::build_test_app();

    let response = post_json(
        app.router(),
        WEBHOOK,
        json!({"action": "state-change", "channel": "c", "uuid": "u"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(app.herald.metrics.webhook_dropped.get(), 1);
}

#[tokio::test]
async fn join_without_uuid_returns_400() {
    let app = common::build_test_app();

    let response = post_json(
        app.router(),
        WEBHOOK,
        json!({"action": "join", "channel": "c"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
