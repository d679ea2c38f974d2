use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use tunebot_common::models::{GuildId, LoopMode};
use tunebot_common::PlaybackError;

use crate::eventbus::{BotEvent, EventBus};
use crate::services::SessionReconciler;

/// Buffer for each event-stream client's bus subscription. A client that
/// falls this far behind is dropped by the bus and its stream ends.
const SSE_BUFFER: usize = 256;

/// Shared state for the dashboard routes.
#[derive(Clone)]
pub struct DashboardState {
    pub reconciler: Arc<SessionReconciler>,
    pub bus: EventBus,
}

/// Body of `POST /api/control`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(deserialize_with = "guild_id_from_any")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub volume: Option<u32>,
}

/// Discord ids overflow JavaScript numbers, so browsers send them as strings.
fn guild_id_from_any<'de, D>(deserializer: D) -> Result<GuildId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/status", get(list_sessions))
        .route("/api/status/{guild_id}", get(session_status))
        .route("/api/control", post(control))
        .route("/api/events", get(events))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn list_sessions(State(state): State<DashboardState>) -> Json<serde_json::Value> {
    Json(json!({ "sessions": state.reconciler.snapshots() }))
}

async fn session_status(State(state): State<DashboardState>, Path(guild_id): Path<GuildId>) -> Response {
    match state.reconciler.get_snapshot(guild_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no session for guild {guild_id}") })),
        )
            .into_response(),
    }
}

async fn control(State(state): State<DashboardState>, Json(req): Json<ControlRequest>) -> Response {
    info!(guild_id = req.guild_id, action = %req.action, "dashboard control request");
    match apply_control(&state.reconciler, &req).await {
        Ok(message) => Json(json!({ "success": true, "message": message })).into_response(),
        Err(error) => (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response(),
    }
}

async fn apply_control(reconciler: &SessionReconciler, req: &ControlRequest) -> Result<String, String> {
    let guild_id = req.guild_id;
    let render = |e: PlaybackError| e.to_string();
    match req.action.to_lowercase().as_str() {
        "play" | "resume" => {
            reconciler.request_resume(guild_id).await.map_err(render)?;
            Ok("Resumed".into())
        }
        "pause" => {
            reconciler.request_pause(guild_id).await.map_err(render)?;
            Ok("Paused".into())
        }
        "skip" => match reconciler.request_skip(guild_id).await.map_err(render)? {
            Some(item) => Ok(format!("Skipped {}", item.title)),
            None => Ok("Skipped".into()),
        },
        "stop" => {
            let stopped = reconciler.request_stop(guild_id).await.map_err(render)?;
            Ok(if stopped { "Stopped".into() } else { "Nothing to stop".into() })
        }
        "loop" => {
            let raw = req.mode.as_deref().ok_or("missing 'mode'")?;
            let mode = raw.parse::<LoopMode>()?;
            let mode = reconciler.set_loop_mode(guild_id, mode).await.map_err(render)?;
            Ok(format!("Loop mode set to {mode}"))
        }
        "volume" => {
            let volume = req.volume.ok_or("missing 'volume'")?;
            let volume = reconciler.set_volume(guild_id, volume).await.map_err(render)?;
            Ok(format!("Volume set to {volume}%"))
        }
        other => Err(format!("Unknown action: {other}")),
    }
}

async fn events(State(state): State<DashboardState>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.bus.subscribe(Some(SSE_BUFFER)).await;
    debug!("dashboard event stream client connected");
    let stream = ReceiverStream::new(rx).filter_map(|event| to_sse(&event).map(Ok));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &BotEvent) -> Option<SseEvent> {
    let data = match event {
        BotEvent::SessionUpdated(snapshot) => serde_json::to_value(snapshot).ok()?,
        BotEvent::SessionEnded { guild_id, reason, timestamp } => json!({
            "guild_id": guild_id,
            "reason": reason,
            "timestamp": timestamp,
        }),
        BotEvent::Notification { guild_id, message, .. } => json!({
            "guild_id": guild_id,
            "message": message,
        }),
    };
    Some(SseEvent::default().event(event.event_type()).data(data.to_string()))
}
