//! On-disk chat store — one JSON file per chat id under the history directory.
//!
//! Persistence failures are logged and reported as booleans; the caller keeps
//! its in-memory data and the request proceeds where possible.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::types::*;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Create a store rooted at the given history directory.
    pub fn new(dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Failed to create history directory {}: {}", dir.display(), e);
        }
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn chat_path(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{chat_id}.json"))
    }

    /// Create a new chat and persist it. Returns the generated id.
    pub fn create_chat(&self, name: Option<&str>) -> String {
        let chat_id = uuid::Uuid::new_v4().to_string();
        let chat = Chat {
            id: chat_id.clone(),
            name: name
                .map(|n| n.to_string())
                .unwrap_or_else(|| default_chat_name("New chat")),
            created: chrono::Utc::now().timestamp_millis(),
            messages: Vec::new(),
            was_converted: false,
        };
        self.save(&chat);
        info!("Created chat [{}] named \"{}\"", chat_id, chat.name);
        chat_id
    }

    /// Persist a chat record. Returns false on I/O failure.
    pub fn save(&self, chat: &Chat) -> bool {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Failed to create history directory: {}", e);
            return false;
        }
        let json = match serde_json::to_string_pretty(chat) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize chat {}: {}", chat.id, e);
                return false;
            }
        };
        match std::fs::write(self.chat_path(&chat.id), json) {
            Ok(()) => {
                debug!("Saved chat {}", chat.id);
                true
            }
            Err(e) => {
                warn!("Failed to save chat {}: {}", chat.id, e);
                false
            }
        }
    }

    /// Load a chat record, migrating legacy formats and repairing missing
    /// fields. Always returns a usable record; an unreadable file yields a
    /// fresh empty chat under the same id.
    pub fn load(&self, chat_id: &str) -> Chat {
        let path = self.chat_path(chat_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => upgrade_record(chat_id, value),
                Err(e) => {
                    warn!("Failed to parse chat {}: {}", chat_id, e);
                    Chat {
                        id: chat_id.to_string(),
                        name: default_chat_name("Recovered chat"),
                        created: chrono::Utc::now().timestamp_millis(),
                        messages: Vec::new(),
                        was_converted: false,
                    }
                }
            },
            Err(_) => {
                info!("History file for chat {} not found", chat_id);
                Chat {
                    id: chat_id.to_string(),
                    name: default_chat_name("New chat"),
                    created: chrono::Utc::now().timestamp_millis(),
                    messages: Vec::new(),
                    was_converted: false,
                }
            }
        }
    }

    pub fn exists(&self, chat_id: &str) -> bool {
        self.chat_path(chat_id).is_file()
    }

    /// Rename an existing chat. Fails without creating a file when the chat
    /// does not exist.
    pub fn rename(&self, chat_id: &str, new_name: &str) -> bool {
        if !self.exists(chat_id) {
            warn!("Attempted to rename nonexistent chat {}", chat_id);
            return false;
        }
        let mut chat = self.load(chat_id);
        let old_name = std::mem::replace(&mut chat.name, new_name.to_string());
        let saved = self.save(&chat);
        if saved {
            info!("Renamed chat {}: \"{}\" -> \"{}\"", chat_id, old_name, new_name);
        }
        saved
    }

    /// Delete a chat file. Returns false when absent.
    pub fn delete(&self, chat_id: &str) -> bool {
        let path = self.chat_path(chat_id);
        if !path.is_file() {
            warn!("Attempted to delete nonexistent chat {}", chat_id);
            return false;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted chat {}", chat_id);
                true
            }
            Err(e) => {
                warn!("Failed to delete chat {}: {}", chat_id, e);
                false
            }
        }
    }

    /// Append a user message. Returns the message id on success.
    pub fn add_user_message(&self, chat_id: &str, content: &str) -> Option<String> {
        info!(
            "Appending user message to chat {}, length {}",
            chat_id,
            content.len()
        );
        self.append(chat_id, Message::user(content))
    }

    /// Append an assistant message with its usage metadata.
    pub fn add_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
        info: HashMap<String, serde_json::Value>,
    ) -> Option<String> {
        info!(
            "Appending assistant message to chat {}, length {}",
            chat_id,
            content.len()
        );
        self.append(chat_id, Message::assistant(content, info))
    }

    fn append(&self, chat_id: &str, message: Message) -> Option<String> {
        let mut chat = self.load(chat_id);

        if chat.messages.len() >= MAX_HISTORY_LENGTH {
            info!(
                "Chat {} reached the history bound ({}), trimming oldest entries",
                chat_id, MAX_HISTORY_LENGTH
            );
            // Pin the conversation seed at index 0; drop the oldest of the rest.
            let keep_from = chat.messages.len() + 2 - MAX_HISTORY_LENGTH;
            let mut trimmed = vec![chat.messages[0].clone()];
            trimmed.extend_from_slice(&chat.messages[keep_from..]);
            chat.messages = trimmed;
        }

        let message_id = message.id.clone();
        chat.messages.push(message);
        if self.save(&chat) {
            debug!("Message {} added to chat {}", message_id, chat_id);
            Some(message_id)
        } else {
            None
        }
    }

    /// List all chats, newest-created first.
    pub fn list(&self) -> Vec<ChatSummary> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read history directory: {}", e);
                return Vec::new();
            }
        };

        let mut converted = 0usize;
        let mut chats: Vec<ChatSummary> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let chat_id = name.strip_suffix(".json")?.to_string();
                let chat = self.load(&chat_id);
                if chat.was_converted {
                    converted += 1;
                }
                Some(ChatSummary {
                    id: chat_id,
                    name: chat.name,
                    created: chat.created,
                    message_count: chat.messages.len(),
                    user_message_count: chat
                        .messages
                        .iter()
                        .filter(|m| m.role == Role::User)
                        .count(),
                })
            })
            .collect();

        if converted > 0 {
            info!("Migrated {} chats from the legacy format", converted);
        }

        chats.sort_by(|a, b| b.created.cmp(&a.created));
        chats
    }

    /// Delete chats matching the given criteria. Filters compose; `max_chats`
    /// additionally evicts the oldest chats beyond the cap.
    pub fn cleanup(&self, criteria: &CleanupCriteria) -> CleanupResult {
        let chats = self.list();
        info!("Cleanup over {} chats: {:?}", chats.len(), criteria);

        let mut to_delete = chats.clone();

        if let Some(older_than) = criteria.older_than {
            let cutoff = chrono::Utc::now().timestamp_millis() - older_than;
            to_delete.retain(|c| c.created < cutoff);
        }
        if let Some(bound) = criteria.user_message_count_less_than {
            to_delete.retain(|c| c.user_message_count < bound);
        }
        if let Some(bound) = criteria.message_count_less_than {
            to_delete.retain(|c| c.message_count < bound);
        }
        if let Some(max_chats) = criteria.max_chats {
            if chats.len() > max_chats {
                let mut by_age = chats.clone();
                by_age.sort_by(|a, b| a.created.cmp(&b.created));
                for oldest in by_age.into_iter().take(chats.len() - max_chats) {
                    if !to_delete.iter().any(|c| c.id == oldest.id) {
                        to_delete.push(oldest);
                    }
                }
            }
        }

        let mut deleted_chats = Vec::new();
        for chat in &to_delete {
            if self.delete(&chat.id) {
                deleted_chats.push(chat.id.clone());
            }
        }

        info!("Cleanup deleted {} chats", deleted_chats.len());
        CleanupResult {
            success: true,
            deleted_count: deleted_chats.len(),
            deleted_chats,
        }
    }
}

fn default_chat_name(prefix: &str) -> String {
    format!(
        "{} {}",
        prefix,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Repair a raw on-disk record: bare arrays are the legacy format (messages
/// only); objects get missing fields backfilled.
/// Deserialize each message independently so one malformed entry does not
/// discard the rest of the chat.
fn salvage_messages(chat_id: &str, value: serde_json::Value) -> Vec<Message> {
    let serde_json::Value::Array(entries) = value else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping unreadable message in chat {}: {}", chat_id, e);
                None
            }
        })
        .collect()
}

fn upgrade_record(chat_id: &str, value: serde_json::Value) -> Chat {
    if value.is_array() {
        debug!("Chat {} uses the legacy array format, converting", chat_id);
        let messages = salvage_messages(chat_id, value);
        return Chat {
            id: chat_id.to_string(),
            name: default_chat_name("Chat from"),
            created: chrono::Utc::now().timestamp_millis(),
            messages,
            was_converted: true,
        };
    }

    let short_id: String = chat_id.chars().take(6).collect();
    let obj = value.as_object().cloned().unwrap_or_default();
    Chat {
        id: obj
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or(chat_id)
            .to_string(),
        name: obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Chat {short_id}")),
        created: obj
            .get("created")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        messages: obj
            .get("messages")
            .cloned()
            .map(|v| salvage_messages(chat_id, v))
            .unwrap_or_default(),
        was_converted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> HistoryStore {
        HistoryStore::new(dir)
    }

    #[test]
    fn test_create_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let id = store.create_chat(Some("Weather"));
        store.add_user_message(&id, "hello");

        let chat = store.load(&id);
        assert_eq!(chat.name, "Weather");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].content, "hello");
        assert_eq!(chat.messages[0].role, Role::User);
    }

    #[test]
    fn test_default_name_has_timestamp_and_ids_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let a = store.create_chat(None);
        let b = store.create_chat(None);
        assert_ne!(a, b);

        let chat = store.load(&a);
        assert!(!chat.name.is_empty());
        assert!(chat.name.chars().any(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_history_bound_keeps_seed_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create_chat(None);

        for i in 0..150 {
            store.add_user_message(&id, &format!("msg {i}"));
        }

        let chat = store.load(&id);
        assert!(chat.messages.len() <= MAX_HISTORY_LENGTH);
        assert_eq!(chat.messages[0].content, "msg 0");
        assert_eq!(chat.messages.last().unwrap().content, "msg 149");
    }

    #[test]
    fn test_rename_nonexistent_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(!store.rename("no-such-chat", "name"));
        assert!(!dir.path().join("no-such-chat.json").exists());
    }

    #[test]
    fn test_delete_nonexistent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(!store.delete("no-such-chat"));
    }

    #[test]
    fn test_legacy_array_format_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let legacy = serde_json::json!([
            { "id": "m1", "role": "user", "content": "old question", "timestamp": 10 },
            // Oldest records carried no ids or timestamps at all.
            { "role": "assistant", "content": "old answer" },
        ]);
        std::fs::write(
            dir.path().join("legacy-chat.json"),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let chat = store.load("legacy-chat");
        assert!(chat.was_converted);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1].content, "old answer");

        // Appending persists the upgraded record shape.
        store.add_user_message("legacy-chat", "new question");
        let reloaded = store.load("legacy-chat");
        assert_eq!(reloaded.messages.len(), 3);
        assert_eq!(reloaded.messages[2].content, "new question");
    }

    #[test]
    fn test_malformed_message_is_dropped_not_the_whole_chat() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let record = serde_json::json!({
            "id": "mixed-chat",
            "name": "Mixed",
            "created": 1000,
            "messages": [
                { "role": "user", "content": "first" },
                { "role": "narrator", "content": "not a real role" },
                { "role": "assistant", "content": "second" },
            ]
        });
        std::fs::write(
            dir.path().join("mixed-chat.json"),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let chat = store.load("mixed-chat");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].content, "first");
        assert_eq!(chat.messages[1].content, "second");
    }

    #[test]
    fn test_list_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        for (id, created) in [("a", 100), ("b", 300), ("c", 200)] {
            store.save(&Chat {
                id: id.into(),
                name: id.into(),
                created,
                messages: Vec::new(),
                was_converted: false,
            });
        }

        let listed = store.list();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_cleanup_max_chats_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        for (id, created) in [("old", 100), ("mid", 200), ("new", 300)] {
            store.save(&Chat {
                id: id.into(),
                name: id.into(),
                created,
                messages: Vec::new(),
                was_converted: false,
            });
        }

        let result = store.cleanup(&CleanupCriteria {
            max_chats: Some(1),
            ..Default::default()
        });

        assert!(result.success);
        assert_eq!(result.deleted_count, 2);
        assert!(store.exists("new"));
        assert!(!store.exists("old"));
        assert!(!store.exists("mid"));
    }

    #[test]
    fn test_cleanup_user_message_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let empty = store.create_chat(Some("empty"));
        let busy = store.create_chat(Some("busy"));
        store.add_user_message(&busy, "hi");
        store.add_user_message(&busy, "again");

        let result = store.cleanup(&CleanupCriteria {
            user_message_count_less_than: Some(1),
            ..Default::default()
        });

        assert_eq!(result.deleted_chats, vec![empty.clone()]);
        assert!(!store.exists(&empty));
        assert!(store.exists(&busy));
    }
}
