// tests/dashboard_tests.rs

mod test_utils;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use tunebot_common::models::{LoopMode, SessionState};
use tunebot_core::dashboard::{router, DashboardState};

use test_utils::*;

fn app(h: &Harness) -> Router {
    router(DashboardState {
        reconciler: h.reconciler.clone(),
        bus: h.bus.clone(),
    })
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, req).await
}

async fn control(app: &Router, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/control")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test(start_paused = true)]
async fn test_status_lists_sessions() {
    let h = harness();
    let app = app(&h);

    let (status, body) = get(&app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "sessions": [] }));

    h.play_and_start("song a").await;
    let (_, body) = get(&app, "/api/status").await;
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["guild_id"], json!(GUILD));
    assert_eq!(sessions[0]["state"], json!("playing"));
    assert_eq!(sessions[0]["current_item"]["title"], json!("song a"));
}

#[tokio::test(start_paused = true)]
async fn test_single_session_status() {
    let h = harness();
    let app = app(&h);
    h.play_and_start("song a").await;
    h.play("song b").await;

    let (status, body) = get(&app, &format!("/api/status/{GUILD}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loop_mode"], json!("off"));
    assert_eq!(body["volume"], json!(100));
    assert_eq!(body["queue"][0]["title"], json!("song b"));

    let (status, body) = get(&app, "/api/status/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("no session for guild 999"));
}

#[tokio::test(start_paused = true)]
async fn test_control_actions() {
    let h = harness();
    let app = app(&h);
    h.play_and_start("song a").await;
    h.play("song b").await;

    let (status, body) = control(&app, json!({ "action": "pause", "guild_id": GUILD.to_string() })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "Paused" }));
    assert_eq!(h.reconciler.get_snapshot(GUILD).unwrap().state, SessionState::Paused);

    let (status, body) = control(&app, json!({ "action": "pause", "guild_id": GUILD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Can't pause while paused."));

    let (_, body) = control(&app, json!({ "action": "play", "guild_id": GUILD })).await;
    assert_eq!(body["message"], json!("Resumed"));

    let (_, body) = control(&app, json!({ "action": "loop", "guild_id": GUILD, "mode": "queue" })).await;
    assert_eq!(body["message"], json!("Loop mode set to queue"));
    assert_eq!(h.reconciler.get_snapshot(GUILD).unwrap().loop_mode, LoopMode::RepeatQueue);

    let (_, body) = control(&app, json!({ "action": "skip", "guild_id": GUILD })).await;
    assert_eq!(body["message"], json!("Skipped song a"));

    let (_, body) = control(&app, json!({ "action": "stop", "guild_id": GUILD })).await;
    assert_eq!(body["message"], json!("Stopped"));
    let (_, body) = control(&app, json!({ "action": "stop", "guild_id": GUILD })).await;
    assert_eq!(body["message"], json!("Nothing to stop"));
}

#[tokio::test(start_paused = true)]
async fn test_control_rejects_bad_requests() {
    let h = harness();
    let app = app(&h);
    h.play_and_start("song a").await;

    let (status, body) = control(&app, json!({ "action": "volume", "guild_id": GUILD, "volume": 300 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Volume must be between 0 and 100 (got 300)."));

    let (status, body) = control(&app, json!({ "action": "volume", "guild_id": GUILD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("missing 'volume'"));

    let (status, body) = control(&app, json!({ "action": "loop", "guild_id": GUILD, "mode": "forever" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Unknown loop mode: forever"));

    let (status, body) = control(&app, json!({ "action": "rewind", "guild_id": GUILD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Unknown action: rewind"));

    let (status, body) = control(&app, json!({ "action": "skip", "guild_id": 5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Nothing is playing right now."));
}

#[tokio::test(start_paused = true)]
async fn test_control_volume() {
    let h = harness();
    let app = app(&h);
    h.play_and_start("song a").await;

    let (status, body) = control(&app, json!({ "action": "volume", "guild_id": GUILD, "volume": 25 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Volume set to 25%"));
    assert!(h.engine.calls().contains(&EngineCall::SetVolume(GUILD, 25)));
}
