//! Chat history management — create, list, fetch, delete, rename, cleanup.
//! Matches /api/chats/* from the Express server.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::state::AppState;
use qwenrelay_history::CleanupCriteria;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // Registered before the parameterized routes to keep "cleanup" from
        // being read as a chat id.
        .route("/chats/cleanup", post(cleanup_chats))
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/{chat_id}", get(get_chat).delete(delete_chat))
        .route("/chats/{chat_id}/rename", put(rename_chat))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    pub name: Option<String>,
}

async fn create_chat(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateChatRequest>>,
) -> impl IntoResponse {
    let name = body.and_then(|Json(req)| req.name);
    let chat_id = state.dispatcher.history().create_chat(name.as_deref());
    info!("Created chat {}", chat_id);
    Json(serde_json::json!({ "chatId": chat_id }))
}

async fn list_chats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let chats = state.dispatcher.history().list();
    info!("Returning {} chats", chats.len());
    Json(serde_json::json!({ "chats": chats }))
}

async fn get_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> impl IntoResponse {
    if !state.dispatcher.history().exists(&chat_id) {
        warn!("Chat not found: {}", chat_id);
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Chat not found" })),
        )
            .into_response();
    }

    let history = state.dispatcher.history().load(&chat_id);
    info!("Returning chat {} with {} messages", chat_id, history.messages.len());
    Json(serde_json::json!({ "chatId": chat_id, "history": history })).into_response()
}

async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> impl IntoResponse {
    if !state.dispatcher.history().exists(&chat_id) {
        warn!("Chat not found for deletion: {}", chat_id);
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Chat not found" })),
        )
            .into_response();
    }

    let success = state.dispatcher.history().delete(&chat_id);
    info!("Chat {} {}", chat_id, if success { "deleted" } else { "not deleted" });
    Json(serde_json::json!({ "success": success })).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct RenameChatRequest {
    pub name: Option<String>,
}

async fn rename_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    body: Option<Json<RenameChatRequest>>,
) -> impl IntoResponse {
    if !state.dispatcher.history().exists(&chat_id) {
        warn!("Chat not found for rename: {}", chat_id);
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Chat not found" })),
        )
            .into_response();
    }

    let name = body
        .and_then(|Json(req)| req.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let Some(name) = name else {
        warn!("Rename request without a valid name for chat {}", chat_id);
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Chat name missing or invalid" })),
        )
            .into_response();
    };

    let success = state.dispatcher.history().rename(&chat_id, &name);
    info!("Chat {} {}", chat_id, if success { "renamed" } else { "not renamed" });
    Json(serde_json::json!({ "success": success, "chatId": chat_id, "name": name })).into_response()
}

/// Validated by hand against the raw body so out-of-range values produce a
/// 400 with a named field rather than a generic deserialization rejection.
async fn cleanup_chats(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    let raw = body.map(|Json(v)| v).unwrap_or_else(|| Value::Object(Default::default()));
    info!("Chat cleanup requested: {}", raw);

    if let Some(v) = non_null(&raw, "olderThan") {
        if v.as_i64().map_or(true, |n| n <= 0) {
            warn!("Invalid olderThan value: {}", v);
            return bad_field("olderThan");
        }
    }
    if let Some(v) = non_null(&raw, "userMessageCountLessThan") {
        if v.as_i64().map_or(true, |n| n < 0) {
            warn!("Invalid userMessageCountLessThan value: {}", v);
            return bad_field("userMessageCountLessThan");
        }
    }
    if let Some(v) = non_null(&raw, "messageCountLessThan") {
        if v.as_i64().map_or(true, |n| n < 0) {
            warn!("Invalid messageCountLessThan value: {}", v);
            return bad_field("messageCountLessThan");
        }
    }
    if let Some(v) = non_null(&raw, "maxChats") {
        if v.as_i64().map_or(true, |n| n <= 0) {
            warn!("Invalid maxChats value: {}", v);
            return bad_field("maxChats");
        }
    }

    let criteria: CleanupCriteria = serde_json::from_value(raw).unwrap_or_default();
    let result = state.dispatcher.history().cleanup(&criteria);
    info!("Cleanup deleted {} chats", result.deleted_count);
    Json(result).into_response()
}

fn non_null<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

fn bad_field(field: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": format!("Invalid {field} value") })),
    )
        .into_response()
}
