//! Bearer-token file store.
//!
//! One token process-wide, written verbatim. Last writer wins; callers
//! serialize access through the single dispatcher. I/O failures are logged
//! and reported as a failed save/load, never propagated.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Write the token verbatim, creating parent directories as needed.
    pub fn save(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create session directory: {}", e);
                return false;
            }
        }
        match std::fs::write(&self.path, token) {
            Ok(()) => {
                info!("Auth token saved");
                true
            }
            Err(e) => {
                warn!("Failed to save auth token: {}", e);
                false
            }
        }
    }

    /// Read the stored token, if any.
    pub fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(token) if !token.is_empty() => {
                info!("Auth token loaded");
                Some(token)
            }
            Ok(_) => None,
            Err(_) => None,
        }
    }

    /// Remove the token file.
    pub fn clear(&self) -> bool {
        match std::fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to clear auth token: {}", e);
                false
            }
        }
    }
}
