//! Integration tests for on-demand reconciliation and the metrics endpoint.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{body_json, get, post_raw};
use herald_engine::OnlineSetStore;

// ---------------------------------------------------------------------------
// Test: reconcile replaces the channel with ground truth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconcile_replaces_channel_membership() {
    let app = common::build_test_app();
    app.store.upsert("room", "stale", Utc::now()).await.unwrap();
    app.oracle.set_occupants("room", &["a", "b"]);

    let response = post_raw(app.router(), "/api/v1/reconcile/room", "").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["channel"], "room");
    assert_eq!(json["data"]["occupants"], 2);
    assert_eq!(json["data"]["added"], 2);
    assert_eq!(json["data"]["removed"], 1);

    assert!(!app.store.is_online("room", "stale").await.unwrap());
    assert!(app.store.is_online("room", "a").await.unwrap());
}

// ---------------------------------------------------------------------------
// Test: a second request inside the spacing window is throttled
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_reconcile_is_throttled() {
    let app = common::build_test_app();
    app.oracle.set_occupants("room", &["a"]);

    let first = post_raw(app.router(), "/api/v1/reconcile/room", "").await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post_raw(app.router(), "/api/v1/reconcile/room", "").await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = body_json(second).await;
    assert_eq!(json["code"], "THROTTLED");
}

// ---------------------------------------------------------------------------
// Test: upstream failure maps to 502 and leaves the store untouched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upstream_failure_returns_502() {
    let app = common::build_test_app();
    app.store.upsert("room", "u1", Utc::now()).await.unwrap();
    app.oracle.set_failing(true);

    let response = post_raw(app.router(), "/api/v1/reconcile/room", "").await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UPSTREAM_ERROR");
    assert!(app.store.is_online("room", "u1").await.unwrap());
}

// ---------------------------------------------------------------------------
// Test: metrics snapshot exposes counters by name
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_reports_reconciliation_counters() {
    let app = common::build_test_app();
    app.oracle.set_occupants("room", &["a"]);
    post_raw(app.router(), "/api/v1/reconcile/room", "").await;

    let response = get(app.router(), "/api/v1/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["counters"]["reconciliation.triggered"], 1);
    assert_eq!(json["data"]["counters"]["reconciliation.failed"], 0);
    assert!(json["data"]["gauges"]["store.cache_miss_rate"].is_number());
}
