//! Model allow-list loaded from `models.txt`.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_MODEL: &str = "qwen-max-latest";

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub models: Vec<ModelEntry>,
}

/// Static allow-list of model ids, one per non-comment line of the models
/// file. Loaded once at construction; a missing or unreadable file falls
/// back to the default model alone.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<String>,
}

impl ModelCatalog {
    pub fn load(path: &Path) -> Self {
        let models = match std::fs::read_to_string(path) {
            Ok(content) => {
                let models: Vec<String> = content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(String::from)
                    .collect();
                if models.is_empty() {
                    warn!("Models file {} lists no models", path.display());
                    vec![DEFAULT_MODEL.to_string()]
                } else {
                    models
                }
            }
            Err(e) => {
                warn!("Models file {} not readable: {}", path.display(), e);
                vec![DEFAULT_MODEL.to_string()]
            }
        };
        info!("Available models: {}", models.join(", "));
        Self { models }
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.models.iter().any(|m| m == name)
    }

    /// Map an optional requested model onto the allow-list. Empty or unknown
    /// names fall back to the default, with a warning for unknown ones.
    pub fn resolve(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            None | Some("") => DEFAULT_MODEL.to_string(),
            Some(name) if self.is_valid(name) => name.to_string(),
            Some(name) => {
                warn!(
                    "Requested model \"{}\" is not in the allow-list, using \"{}\"",
                    name, DEFAULT_MODEL
                );
                DEFAULT_MODEL.to_string()
            }
        }
    }

    pub fn all(&self) -> ModelList {
        ModelList {
            models: self
                .models
                .iter()
                .map(|id| ModelEntry {
                    id: id.clone(),
                    name: id.clone(),
                    description: format!("Model {id}"),
                })
                .collect(),
        }
    }
}
