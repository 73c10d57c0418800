//! Chat and message records as persisted on disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages per chat; when exceeded, the oldest entries after the first are
/// dropped. The very first message (the conversation seed) is never evicted.
pub const MAX_HISTORY_LENGTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message. Append-only; never mutated or deleted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Defaulted on read so legacy records without ids survive migration.
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix seconds.
    #[serde(default = "now_secs")]
    pub timestamp: i64,
    /// Usage metadata from the remote call; assistant messages only.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub info: HashMap<String, serde_json::Value>,
    #[serde(default = "default_chat_type")]
    pub chat_type: String,
}

pub(crate) fn default_chat_type() -> String {
    "t2t".into()
}

pub(crate) fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
            info: HashMap::new(),
            chat_type: default_chat_type(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        info: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
            info,
            chat_type: default_chat_type(),
        }
    }
}

/// A chat record as stored in `history/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    /// Unix milliseconds.
    pub created: i64,
    pub messages: Vec<Message>,
    /// Set when the record was migrated from the legacy bare-array format.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub was_converted: bool,
}

/// Listing entry for `GET /chats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub created: i64,
    pub message_count: usize,
    pub user_message_count: usize,
}

/// Rule set for `POST /chats/cleanup`. All fields optional; filters compose.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCriteria {
    /// Delete chats created more than this many milliseconds ago.
    pub older_than: Option<i64>,
    pub user_message_count_less_than: Option<usize>,
    pub message_count_less_than: Option<usize>,
    /// Keep at most this many chats, deleting oldest-by-creation first.
    pub max_chats: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub success: bool,
    pub deleted_count: usize,
    pub deleted_chats: Vec<String>,
}
