// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! HTTP surface: session management endpoints and the voice WebSocket.

pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::conversation::engine::ConversationError;
use crate::conversation::ConversationEngine;
use crate::services::{SttService, TtsService};
use crate::session::{SessionManager, StoreError};
use crate::turn::TurnConfig;

/// Shared collaborators injected at construction.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub conversation: Arc<ConversationEngine>,
    pub stt: Arc<dyn SttService>,
    pub tts: Arc<dyn TtsService>,
}

/// Build the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/session/create", post(create_session))
        .route("/session/:id", get(get_session))
        .route("/session/:id/close", post(close_session))
        .route("/ws/voice/:id", get(ws::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Spawn the background task that idles and expires sessions.
pub fn spawn_session_cleanup(sessions: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            sessions.cleanup_idle_sessions().await;
        }
    })
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// JSON error response with a status code.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<ConversationError> for ApiError {
    fn from(e: ConversationError) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// Body of `POST /session/create`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    /// Per-session turn-taking timing overrides.
    #[serde(default)]
    pub turn: Option<TurnConfig>,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let id = state
        .sessions
        .create_session(request.user_id.as_deref())
        .await?;
    state.conversation.initialize(&id).await?;
    if let Some(turn) = &request.turn {
        state.sessions.set_turn_config(&id, turn).await?;
    }

    info!(session_id = %id, "session created");
    Ok(Json(json!({
        "session_id": id,
        "message": "Session created",
    })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(session) = state.sessions.get_session(&id).await? else {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            "Session not found".to_string(),
        ));
    };
    let is_idle = state.sessions.check_idle(&id).await?;

    Ok(Json(json!({
        "session_id": id,
        "state": session.get("state"),
        "created_at": session.get("created_at"),
        "last_activity": session.get("last_activity"),
        "is_idle": is_idle,
    })))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.sessions.get_session(&id).await?.is_none() {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            "Session not found".to_string(),
        ));
    }
    state.sessions.close_session(&id).await?;
    Ok(Json(json!({
        "message": "Session closed",
        "session_id": id,
    })))
}
