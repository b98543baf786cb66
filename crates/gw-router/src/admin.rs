//! Operator endpoints: manual rotation control and runtime toggles,
//! guarded by the same API-key auth as the data plane. No session/cookie
//! login or web UI.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use gw_common::config::StreamingMode;
use gw_core::events::OperationalEvent;
use gw_core::AppState;

#[derive(Clone)]
pub struct AdminState {
    app: AppState,
    last_event: Arc<Mutex<Option<String>>>,
}

pub fn admin_router(app: AppState) -> Router {
    let last_event = Arc::new(Mutex::new(None));
    spawn_event_mirror(&app, last_event.clone());
    let state = AdminState { app, last_event };

    Router::new()
        .route("/api/switch-account", post(switch_account))
        .route("/api/set-mode", post(set_mode))
        .route("/api/toggle-reasoning", post(toggle_reasoning))
        .route("/api/toggle-native-reasoning", post(toggle_native_reasoning))
        .route("/api/set-resume-config", post(set_resume_config))
        .route("/api/status", get(status))
        .with_state(state)
}

/// Mirrors the rotation controller's broadcast so `/api/status` can report
/// the last event without polling.
fn spawn_event_mirror(app: &AppState, last_event: Arc<Mutex<Option<String>>>) {
    let mut events = app.rotation.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            *last_event.lock().unwrap() = Some(describe_event(&event));
        }
    });
}

fn describe_event(event: &OperationalEvent) -> String {
    match event {
        OperationalEvent::SwitchStarted { from, to, .. } => format!("switch_started {from}->{to}"),
        OperationalEvent::SwitchSucceeded { index, .. } => format!("switch_succeeded {index}"),
        OperationalEvent::SwitchFailed { index, error, .. } => format!("switch_failed {index}: {error}"),
        OperationalEvent::FallbackSwitching { to, .. } => format!("fallback_switching {to}"),
        OperationalEvent::ConnectionLost { .. } => "connection_lost".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct SwitchAccountRequest {
    target_index: Option<u32>,
}

async fn switch_account(
    State(state): State<AdminState>,
    Json(body): Json<SwitchAccountRequest>,
) -> impl IntoResponse {
    let result = match body.target_index {
        Some(target) => state.app.rotation.switch_manual(target).await,
        None => state.app.rotation.switch_immediate().await,
    };
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SetModeRequest {
    mode: String,
}

async fn set_mode(State(state): State<AdminState>, Json(body): Json<SetModeRequest>) -> impl IntoResponse {
    match StreamingMode::parse(&body.mode) {
        Some(mode) => {
            state.app.settings.set_streaming_mode(mode);
            (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "mode must be \"real\" or \"fake\"" })),
        )
            .into_response(),
    }
}

async fn toggle_reasoning(State(state): State<AdminState>) -> impl IntoResponse {
    let now = state.app.settings.toggle_include_thoughts();
    Json(json!({ "ok": true, "include_thoughts": now }))
}

async fn toggle_native_reasoning(State(state): State<AdminState>) -> impl IntoResponse {
    let now = state.app.settings.toggle_native_reasoning();
    Json(json!({ "ok": true, "native_reasoning": now }))
}

#[derive(Debug, Deserialize)]
struct SetResumeConfigRequest {
    limit: u32,
}

async fn set_resume_config(
    State(state): State<AdminState>,
    Json(body): Json<SetResumeConfigRequest>,
) -> impl IntoResponse {
    state.app.settings.set_resume_limit(body.limit);
    (StatusCode::OK, Json(json!({ "ok": true, "resume_limit": body.limit })))
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    let current_index = state.app.rotation.current_index().await;
    let busy = state.app.rotation.is_system_busy().await;
    let connected = state.app.link.has_live_connection();
    let last_event = state.last_event.lock().unwrap().clone();

    Json(json!({
        "current_index": current_index,
        "system_busy": busy,
        "agent_connected": connected,
        "streaming_mode": format!("{:?}", state.app.settings.streaming_mode()).to_lowercase(),
        "include_thoughts": state.app.settings.include_thoughts(),
        "native_reasoning": state.app.settings.native_reasoning(),
        "resume_limit": state.app.settings.resume_limit(),
        "last_event": last_event,
        "checked_at": OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
    }))
}
