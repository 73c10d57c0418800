//! Dispatch result shapes as seen by HTTP clients.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform capture of an in-page `fetch` against the completion endpoint, as
/// produced by the injected script: either a parsed JSON body, an HTTP error
/// with its body, or a thrown-error string.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Raw body when a 200 response failed to parse as JSON; anti-bot
    /// interstitials land here.
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, rename = "statusText")]
    pub status_text: Option<String>,
    #[serde(default, rename = "errorBody")]
    pub error_body: Option<String>,
}

impl FetchOutcome {
    /// A non-JSON body containing the verification marker means the session
    /// is poisoned and needs an interactive relaunch.
    pub fn is_verification_challenge(&self, marker: &str) -> bool {
        self.html.as_deref().is_some_and(|h| h.contains(marker))
    }

    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.status_text.clone())
            .unwrap_or_else(|| "Completion request failed".to_string())
    }
}

/// Successful completion result.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub content: String,
    pub usage: HashMap<String, Value>,
    #[serde(rename = "chatId")]
    pub chat_id: String,
}

/// Structured failure payload; `verification: true` distinguishes the
/// session-poisoning case from generic errors.
#[derive(Debug, Clone, Serialize)]
pub struct SendFailure {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<bool>,
    #[serde(rename = "chatId")]
    pub chat_id: String,
}

impl SendFailure {
    pub fn new(error: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            verification: None,
            chat_id: chat_id.into(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn verification(mut self) -> Self {
        self.verification = Some(true);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SendOutcome {
    Completion(Completion),
    Failure(SendFailure),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Completion(_))
    }
}
