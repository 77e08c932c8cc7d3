use super::state::AppState;
use crate::action::ImageRef;
use crate::session::{ActionLog, SessionState, TranscriptEntry};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub session_id: String,
    /// State at the time the request was accepted
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub state: SessionState,
    pub error_message: Option<String>,
    pub last_image: Option<ImageRef>,
    /// `last_image` as an `<img src>` value
    pub last_image_src: Option<String>,
    pub history_len: usize,
    pub actions_len: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// Which states a control request makes sense in
fn check_state(state: SessionState, allowed: &[SessionState], action: &str) -> Option<Response> {
    if allowed.contains(&state) {
        return None;
    }
    Some(error_response(
        StatusCode::CONFLICT,
        format!("Cannot {} while session is {}", action, state),
    ))
}

fn accepted(state: &AppState, result: crate::error::Result<()>, message: &str) -> Response {
    if let Err(e) = result {
        error!("Session command failed: {}", e);
        return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
    }

    let snapshot = state.session.snapshot();
    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            session_id: snapshot.session_id,
            state: snapshot.state,
            message: message.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a conversation
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(rejected) = check_state(state.session.state(), &[SessionState::Idle], "start") {
        return rejected;
    }

    info!("Starting voice session");
    let result = state.session.start().await;
    accepted(&state, result, "Connecting")
}

/// POST /session/stop
/// Close the channel; the session returns to idle once the close lands
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    let current = state.session.state();
    if let Some(rejected) = check_state(
        current,
        &[
            SessionState::Connecting,
            SessionState::Listening,
            SessionState::Speaking,
        ],
        "stop",
    ) {
        return rejected;
    }

    info!("Stopping voice session");
    let result = state.session.stop().await;
    accepted(&state, result, "Closing")
}

/// POST /session/retry
/// Retry after a generic error
pub async fn retry_session(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(rejected) = check_state(state.session.state(), &[SessionState::Error], "retry") {
        return rejected;
    }

    info!("Retrying voice session");
    let result = state.session.retry().await;
    accepted(&state, result, "Reconnecting")
}

/// POST /session/reauth
/// Report that a new credential has been selected
pub async fn reauth_session(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(rejected) = check_state(
        state.session.state(),
        &[SessionState::AwaitingAuth],
        "re-authenticate",
    ) {
        return rejected;
    }

    info!("Credential updated; session back to idle");
    let result = state.session.reauth_completed().await;
    accepted(&state, result, "Re-authenticated")
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    let last_image_src = snapshot.last_image.as_ref().map(ImageRef::to_src);

    (
        StatusCode::OK,
        Json(StatusResponse {
            session_id: snapshot.session_id,
            state: snapshot.state,
            error_message: snapshot.error_message,
            last_image: snapshot.last_image,
            last_image_src,
            history_len: snapshot.history.len(),
            actions_len: snapshot.actions.len(),
            updated_at: snapshot.updated_at,
        }),
    )
}

/// GET /session/transcript
/// Rolling history of completed turns, newest first
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let history: Vec<TranscriptEntry> = state.session.snapshot().history;
    (StatusCode::OK, Json(history))
}

/// GET /session/actions
/// Dispatched actions, newest first
pub async fn get_actions(State(state): State<AppState>) -> impl IntoResponse {
    let actions: Vec<ActionLog> = state.session.snapshot().actions;
    (StatusCode::OK, Json(actions))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
