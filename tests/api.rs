//! API endpoint integration tests

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use voxturn::ControllerSettings;
use voxturn::api::ApiServerBuilder;

mod common;
use common::{Gate, Harness, ScriptedMicrophone, Setup, speech};

/// Build a test API router over a scripted controller
fn build_test_router(setup: Setup) -> (axum::Router, Harness) {
    let harness = setup.spawn();
    let router = ApiServerBuilder::new(harness.controller.clone(), 0)
        .build()
        .router();
    (router, harness)
}

async fn send(
    router: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    // Extractor rejections answer in plain text
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _harness) = build_test_router(Setup::default());

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_starts_idle() {
    let (app, _harness) = build_test_router(Setup::default());

    let (status, body) = send(&app, Method::GET, "/api/turn", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["ready"], true);
    assert!(body["turn"].is_null());
    assert!(body["last_error"].is_null());
}

#[tokio::test]
async fn test_start_then_second_start_conflicts() {
    let (app, _harness) = build_test_router(Setup::default());

    let (status, body) = send(&app, Method::POST, "/api/turn/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["turn"], 1);
    assert_eq!(body["state"], "capturing");

    let (status, body) = send(&app, Method::POST, "/api/turn/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "invalid_state");
    assert_eq!(
        body["error"]["message"],
        "cannot start a turn while capturing"
    );
}

#[tokio::test]
async fn test_start_refused_when_not_ready() {
    let (app, harness) = build_test_router(Setup {
        settings: ControllerSettings {
            start_ready: false,
            ..ControllerSettings::default()
        },
        ..Setup::default()
    });

    let (status, body) = send(&app, Method::POST, "/api/turn/start", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "not_ready");
    assert_eq!(harness.controller.state(), voxturn::TurnState::Idle);
}

#[tokio::test]
async fn test_ready_endpoint_opens_gate() {
    let (app, _harness) = build_test_router(Setup {
        settings: ControllerSettings {
            start_ready: false,
            ..ControllerSettings::default()
        },
        ..Setup::default()
    });

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/turn/ready",
        Some(json!({ "ready": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    let (status, _) = send(&app, Method::POST, "/api/turn/start", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_ready_endpoint_rejects_malformed_body() {
    let (app, _harness) = build_test_router(Setup::default());

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/turn/ready",
        Some(json!({ "ready": "yes" })),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_toggle_runs_a_turn() {
    let (app, harness) = build_test_router(Setup::default());

    let (status, body) = send(&app, Method::POST, "/api/turn/toggle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "capturing");

    harness.mic.speak(&speech(Duration::from_secs(1)));

    let (status, body) = send(&app, Method::POST, "/api/turn/toggle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "processing");

    harness
        .controller
        .wait_for(|s| s.turn.is_none())
        .await
        .unwrap();

    let (_, body) = send(&app, Method::GET, "/api/turn", None).await;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["last_outcome"]["kind"], "completed");
    assert_eq!(body["last_outcome"]["segments"], 1);
}

#[tokio::test]
async fn test_end_returns_idle_status() {
    let (app, _harness) = build_test_router(Setup::default());

    send(&app, Method::POST, "/api/turn/start", None).await;
    let (status, body) = send(&app, Method::POST, "/api/turn/end", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["last_outcome"]["kind"], "cancelled");
}

#[tokio::test]
async fn test_end_when_idle_is_noop() {
    let (app, _harness) = build_test_router(Setup::default());

    let (status, body) = send(&app, Method::POST, "/api/turn/end", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert!(body["last_outcome"].is_null());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, _harness) = build_test_router(Setup::default());

    let (status, _) = send(&app, Method::GET, "/api/nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_ready_updates_each_return_their_own_change() {
    let (app, _harness) = build_test_router(Setup {
        settings: ControllerSettings {
            start_ready: false,
            ..ControllerSettings::default()
        },
        ..Setup::default()
    });

    let both = async {
        tokio::join!(
            send(
                &app,
                Method::PUT,
                "/api/turn/ready",
                Some(json!({ "ready": true }))
            ),
            send(
                &app,
                Method::PUT,
                "/api/turn/ready",
                Some(json!({ "ready": false }))
            ),
        )
    };
    let ((open_status, opened), (close_status, closed)) =
        tokio::time::timeout(Duration::from_secs(2), both)
            .await
            .expect("ready updates completed");

    assert_eq!(open_status, StatusCode::OK);
    assert_eq!(close_status, StatusCode::OK);
    assert_eq!(opened["ready"], true);
    assert_eq!(closed["ready"], false);
}

#[tokio::test]
async fn test_start_cancelled_while_microphone_opens_conflicts() {
    let gate = Gate::closed();
    let (app, harness) = build_test_router(Setup {
        mic: ScriptedMicrophone::gated(&gate),
        ..Setup::default()
    });

    let start = send(&app, Method::POST, "/api/turn/start", None);
    let end = async {
        harness
            .controller
            .wait_for(|s| s.state == voxturn::TurnState::Capturing)
            .await
            .unwrap();
        send(&app, Method::POST, "/api/turn/end", None).await
    };
    let ((start_status, started), (end_status, ended)) = tokio::join!(start, end);

    assert_eq!(start_status, StatusCode::CONFLICT);
    assert_eq!(started["error"]["code"], "cancelled");
    assert_eq!(end_status, StatusCode::OK);
    assert_eq!(ended["last_outcome"]["kind"], "cancelled");
}
