#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use herald_api::config::ServerConfig;
use herald_api::router::build_app_router;
use herald_api::state::AppState;
use herald_core::clock::{Clock, SystemClock};
use herald_core::config::HeraldConfig;
use herald_engine::test_support::{RecordingTransport, ScriptedOracle};
use herald_engine::{Herald, MemoryOnlineSet};

/// A running engine behind the full router, with scripted upstream fakes.
pub struct TestApp {
    pub herald: Herald,
    pub store: Arc<MemoryOnlineSet>,
    pub oracle: Arc<ScriptedOracle>,
    pub transport: Arc<RecordingTransport>,
    state: AppState,
}

impl TestApp {
    /// A fresh router sharing this app's state; `oneshot` consumes it.
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone())
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        upstream_url: "http://upstream.invalid".to_string(),
    }
}

/// Start the engine with in-memory collaborators and build the full
/// application router around it, mirroring `main.rs`.
pub fn build_test_app() -> TestApp {
    build_test_app_with(HeraldConfig::default())
}

pub fn build_test_app_with(herald_config: HeraldConfig) -> TestApp {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryOnlineSet::new(herald_config.online_ttl(), clock.clone()));
    let oracle = Arc::new(ScriptedOracle::new());
    let transport = Arc::new(RecordingTransport::new());

    let herald = Herald::start(
        &herald_config,
        store.clone(),
        oracle.clone(),
        transport.clone(),
        clock,
    );
    let state = AppState::new(test_config(), &herald);

    TestApp {
        herald,
        store,
        oracle,
        transport,
        state,
    }
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: Router, uri: &str, body: impl Into<String>) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
