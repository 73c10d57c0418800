//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Paths to all QwenRelay data files and directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Browser session state (`data/session/`).
    pub session: PathBuf,
    /// Bearer token file (`data/session/auth_token.txt`).
    pub token_file: PathBuf,
    /// Serialized cookie/storage snapshot (`data/session/state.json`).
    pub snapshot_file: PathBuf,
    /// Per-chat history records (`data/session/history/`).
    pub history: PathBuf,
    /// Model allow-list, one id per non-comment line (`data/models.txt`).
    pub models_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let session = root.join("session");
        let paths = Self {
            token_file: session.join("auth_token.txt"),
            snapshot_file: session.join("state.json"),
            history: session.join("history"),
            models_file: root.join("models.txt"),
            session,
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    /// Create all required directories.
    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.session)?;
        std::fs::create_dir_all(&self.history)?;
        Ok(())
    }
}

/// Endpoints of the target chat service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Landing page; navigated by every pooled page and the auth flow.
    pub landing_url: String,
    /// Interactive sign-in entry point (visible mode only).
    pub signin_url: String,
    /// Internal completion endpoint, called from inside a page.
    pub completions_url: String,
    /// localStorage key holding the bearer token.
    pub token_storage_key: String,
    /// DOM selector present only while logged out.
    pub login_marker_selector: String,
    /// Page-title substring of the anti-bot interstitial.
    pub verification_title_marker: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            landing_url: "https://chat.qwen.ai/".into(),
            signin_url: "https://chat.qwen.ai/auth?action=signin".into(),
            completions_url: "https://chat.qwen.ai/api/chat/completions".into(),
            token_storage_key: "token".into(),
            login_marker_selector: ".login-container".into(),
            verification_title_marker: "Verification".into(),
        }
    }
}

/// Top-level QwenRelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Target site endpoints and markers.
    pub site: SiteConfig,
}

impl Config {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3264);

        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            site: SiteConfig::default(),
        })
    }
}
