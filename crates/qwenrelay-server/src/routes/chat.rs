//! Chat dispatch, model listing and authentication status.
//! Matches /api/chat, /api/models and /api/status from the Express server.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::AppState;
use qwenrelay_chat::types::SendOutcome;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(send_chat))
        .route("/models", get(list_models))
        .route("/status", get(auth_status))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
}

/// Dispatch failures are part of the response contract and still return 200;
/// only a missing message is a client error.
async fn send_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let Some(message) = req.message.filter(|m| !m.is_empty()) else {
        warn!("Chat request without a message");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "No message provided" })),
        )
            .into_response();
    };

    let preview: String = message.chars().take(50).collect();
    info!("Chat request: {}{}", preview, if message.chars().count() > 50 { "..." } else { "" });
    if let Some(chat_id) = &req.chat_id {
        info!("Using chat id {}", chat_id);
    }
    if let Some(model) = &req.model {
        info!("Requested model {}", model);
    }

    let outcome = state
        .dispatcher
        .send_message(&message, req.model.as_deref(), req.chat_id.as_deref())
        .await;

    match &outcome {
        SendOutcome::Completion(completion) => {
            info!("Completion returned, response length {}", completion.content.len());
        }
        SendOutcome::Failure(failure) => info!("Dispatch failed: {}", failure.error),
    }

    Json(outcome).into_response()
}

async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models = state.dispatcher.catalog().all();
    info!("Returning {} models", models.models.len());
    Json(models)
}

/// Reports the authentication flag; when it is not yet set and a browser is
/// live, runs a full authentication check first.
async fn auth_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    if !state.session.has_browser().await {
        warn!("Status requested but browser is not initialized");
        return Json(serde_json::json!({
            "authenticated": false,
            "message": "Browser not initialized",
        }));
    }

    if state.session.is_authenticated() {
        return Json(serde_json::json!({
            "authenticated": true,
            "message": "Authentication active (saved session in use)",
        }));
    }

    state.session.check_authentication().await;
    let authenticated = state.session.is_authenticated();
    info!(
        "Authentication status: {}",
        if authenticated { "active" } else { "sign-in required" }
    );

    Json(serde_json::json!({
        "authenticated": authenticated,
        "message": if authenticated {
            "Authentication active"
        } else {
            "Authentication required"
        },
    }))
}
