use super::state::AppState;
use crate::error::SessionError;
use crate::session::{AgentUtterance, SessionStats, SessionStatus};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: SessionStatus,
    /// Whether the start control should be enabled
    pub can_start: bool,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl StatusResponse {
    fn from_state(state: &AppState) -> Self {
        let status = state.conversation.status();
        Self {
            can_start: status.start_enabled(),
            status,
            stats: state.conversation.stats(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /conversation/start
/// Start a new conversation attempt
pub async fn start_conversation(State(state): State<AppState>) -> impl IntoResponse {
    info!("Start requested");

    match state.conversation.start().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(StatusResponse::from_state(&state))).into_response(),
        Err(SessionError::AttemptInProgress) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: SessionError::AttemptInProgress.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start conversation: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: format!("Failed to start conversation: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// POST /conversation/stop
/// Close the current attempt
pub async fn stop_conversation(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stop requested");

    match state.conversation.stop().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(StatusResponse::from_state(&state))).into_response(),
        Err(e) => {
            error!("Failed to stop conversation: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: format!("Failed to stop conversation: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /conversation/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(StatusResponse::from_state(&state)))
}

/// GET /conversation/utterances
pub async fn get_utterances(State(state): State<AppState>) -> impl IntoResponse {
    let utterances: Vec<AgentUtterance> = state.conversation.utterances();
    (StatusCode::OK, Json(utterances))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
