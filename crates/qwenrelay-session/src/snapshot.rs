//! Browser session snapshot — serialized cookies plus localStorage contents.
//!
//! Written on every successful authentication and restart, consumed once at
//! process start to skip interactive login. Capturing from and applying to a
//! live browser lives in the browser crate; this module only owns the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A cookie captured from the browser, shaped for CDP replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Serialized state of the one browser context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    /// localStorage entries of the landing origin.
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    /// Unix seconds at capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<i64>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Persist a snapshot, overwriting any previous one.
    pub fn save(&self, snapshot: &SessionSnapshot) -> bool {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create session directory: {}", e);
                return false;
            }
        }
        let json = match serde_json::to_string_pretty(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize session snapshot: {}", e);
                return false;
            }
        };
        match std::fs::write(&self.path, json) {
            Ok(()) => {
                info!("Session snapshot saved ({} cookies)", snapshot.cookies.len());
                true
            }
            Err(e) => {
                warn!("Failed to save session snapshot: {}", e);
                false
            }
        }
    }

    pub fn load(&self) -> Option<SessionSnapshot> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => {
                info!("Session snapshot loaded");
                Some(snapshot)
            }
            Err(e) => {
                warn!("Failed to parse session snapshot: {}", e);
                None
            }
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn clear(&self) -> bool {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Session snapshot cleared");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to clear session snapshot: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionSnapshot {
        SessionSnapshot {
            cookies: vec![StoredCookie {
                name: "ssxmod_itna".into(),
                value: "abc".into(),
                domain: ".qwen.ai".into(),
                path: "/".into(),
                secure: true,
                http_only: true,
                same_site: None,
            }],
            local_storage: HashMap::from([("token".to_string(), "tok-1".to_string())]),
            captured_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(&dir.path().join("state.json"));

        assert!(!store.exists());
        assert!(store.save(&sample()));
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.cookies.len(), 1);
        assert_eq!(loaded.cookies[0].domain, ".qwen.ai");
        assert_eq!(loaded.local_storage.get("token").unwrap(), "tok-1");
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(&dir.path().join("state.json"));

        store.save(&sample());
        assert!(store.clear());
        assert!(!store.exists());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let store = SnapshotStore::new(&path);
        assert!(store.exists());
        assert!(store.load().is_none());
    }
}
