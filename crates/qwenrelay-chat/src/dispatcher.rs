//! Message dispatcher: the façade that turns a user message into a
//! completion call executed inside a live browser page.

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::Page;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use qwenrelay_browser::BrowserSession;
use qwenrelay_core::{Config, Error, SiteConfig};
use qwenrelay_history::HistoryStore;

use crate::models::ModelCatalog;
use crate::types::{Completion, FetchOutcome, SendFailure, SendOutcome};

/// Runs inside the page so the request carries the site's own origin and TLS
/// fingerprint. Returns the uniform `{success, ...}` capture.
const FETCH_FN: &str = r#"async (data) => {
    try {
        const response = await fetch(data.apiUrl, {
            method: 'POST',
            headers: {
                'Content-Type': 'application/json',
                'Authorization': `Bearer ${data.token}`
            },
            body: JSON.stringify(data.payload)
        });
        if (response.ok) {
            const text = await response.text();
            try {
                return { success: true, data: JSON.parse(text) };
            } catch (e) {
                return { success: false, error: 'Completion body was not valid JSON', html: text };
            }
        }
        const errorBody = await response.text();
        return { success: false, status: response.status, statusText: response.statusText, errorBody: errorBody };
    } catch (error) {
        return { success: false, error: error.toString() };
    }
}"#;

pub struct Dispatcher {
    session: Arc<BrowserSession>,
    history: HistoryStore,
    catalog: ModelCatalog,
    site: SiteConfig,
    /// Serializes dispatch per chat id so concurrent sends cannot interleave
    /// writes against the same history file. Entries live only while a
    /// dispatch holds them.
    chat_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(config: &Config, session: Arc<BrowserSession>) -> Self {
        Self {
            session,
            history: HistoryStore::new(&config.data_paths.history),
            catalog: ModelCatalog::load(&config.data_paths.models_file),
            site: config.site.clone(),
            chat_locks: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Send one user message and return the assistant completion, appending
    /// both to the chat's history. An unknown or absent `chat_id` starts a
    /// new chat.
    pub async fn send_message(
        &self,
        message: &str,
        model: Option<&str>,
        chat_id: Option<&str>,
    ) -> SendOutcome {
        let chat_id = match chat_id {
            Some(id) if self.history.exists(id) => id.to_string(),
            _ => {
                let id = self.history.create_chat(None);
                info!("Created new chat {}", id);
                id
            }
        };

        let lock = self
            .chat_locks
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            self.dispatch_locked(&chat_id, message, model).await
        };
        drop(lock);
        // The map entry is only needed while a dispatch holds it.
        self.chat_locks
            .remove_if(&chat_id, |_, lock| Arc::strong_count(lock) == 1);

        outcome
    }

    async fn dispatch_locked(
        &self,
        chat_id: &str,
        message: &str,
        model: Option<&str>,
    ) -> SendOutcome {
        // History reflects the attempt even if the remote call fails.
        self.history.add_user_message(chat_id, message);

        let model = self.catalog.resolve(model);
        info!("Dispatching to model \"{}\"", model);

        if !self.session.has_browser().await {
            return self.fail(Error::Config("Browser not initialized".into()), chat_id);
        }

        if !self.session.is_authenticated() && !self.session.check_authentication().await {
            return self.fail(
                Error::AuthRequired("sign in within the opened browser".into()),
                chat_id,
            );
        }

        if self.session.token().is_none() && self.session.extract_token().await.is_none() {
            return self.fail(
                Error::TokenMissing("no token could be obtained".into()),
                chat_id,
            );
        }

        self.run_completion(chat_id, &model).await
    }

    /// Page-holding portion of dispatch. Any page not released back to the
    /// pool is closed before returning.
    async fn run_completion(&self, chat_id: &str, model: &str) -> SendOutcome {
        let page = match self.session.acquire_page().await {
            Ok(page) => page,
            Err(e) => return self.fail(e, chat_id),
        };

        if self.session.check_verification(&page).await {
            let _ = page.reload().await;
            let _ = page.wait_for_navigation().await;
        }

        // The reload may have disturbed the token; re-pull from the page.
        let token = match self.session.token() {
            Some(token) => token,
            None => match self.session.pull_token_from_page(&page).await {
                Some(token) => {
                    self.session.set_token(&token);
                    token
                }
                None => {
                    let _ = page.close().await;
                    return self.fail(
                        Error::TokenMissing(
                            "absent from browser storage; an interactive restart is required"
                                .into(),
                        ),
                        chat_id,
                    );
                }
            },
        };

        let chat = self.history.load(chat_id);
        let messages: Vec<Value> = chat
            .messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content, "chat_type": "t2t"}))
            .collect();
        info!("Sending completion request with {} messages", messages.len());
        let payload = json!({
            "chat_type": "t2t",
            "messages": messages,
            "model": model,
            "stream": false,
        });

        let outcome = match self.execute_in_page(&page, &payload, &token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = page.close().await;
                return self.fail(e, chat_id);
            }
        };

        // Released in both branches; poisoning drains it again below.
        self.session.release_page(page).await;

        if outcome.success {
            return self.interpret_success(chat_id, outcome);
        }

        if outcome.is_verification_challenge(&self.site.verification_title_marker) {
            warn!("Verification challenge in completion response, relaunching visible");
            let failure = self.poison_and_report(chat_id).await;
            self.session.init(true).await;
            return failure;
        }

        error!("Completion request failed: {}", outcome.failure_message());
        SendOutcome::Failure(
            SendFailure::new(outcome.failure_message(), chat_id).with_details(
                outcome
                    .error_body
                    .unwrap_or_else(|| "No further details".to_string()),
            ),
        )
    }

    /// Render a taxonomy error into the structured failure payload.
    fn fail(&self, err: Error, chat_id: &str) -> SendOutcome {
        warn!("Dispatch failed: {}", err);
        SendOutcome::Failure(SendFailure::new(err.to_string(), chat_id))
    }

    /// A verification body means the shared session is no longer usable:
    /// auth flag, pooled pages, and token are all dropped before reporting
    /// the distinguished failure. The caller relaunches the browser.
    async fn poison_and_report(&self, chat_id: &str) -> SendOutcome {
        self.session.invalidate().await;
        SendOutcome::Failure(
            SendFailure::new(
                Error::Verification("the browser is being relaunched in visible mode".into())
                    .to_string(),
                chat_id,
            )
            .verification(),
        )
    }

    async fn execute_in_page(
        &self,
        page: &Page,
        payload: &Value,
        token: &str,
    ) -> qwenrelay_core::Result<FetchOutcome> {
        let eval_data = json!({
            "apiUrl": self.site.completions_url,
            "payload": payload,
            "token": token,
        });
        let call = format!("({FETCH_FN})({})", serde_json::to_string(&eval_data)?);
        let outcome = page
            .evaluate(call)
            .await
            .map_err(|e| Error::RemoteCall(e.to_string()))?
            .into_value::<FetchOutcome>()
            .map_err(|e| Error::RemoteCall(format!("Unreadable fetch result: {e}")))?;
        Ok(outcome)
    }

    fn interpret_success(&self, chat_id: &str, outcome: FetchOutcome) -> SendOutcome {
        let data = outcome.data.unwrap_or(Value::Null);
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage: HashMap<String, Value> = data
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value(u).ok())
            .unwrap_or_default();

        self.history
            .add_assistant_message(chat_id, &content, usage.clone());
        info!("Completion received for chat {}", chat_id);

        SendOutcome::Completion(Completion {
            content,
            usage,
            chat_id: chat_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qwenrelay_browser::ConfirmGate;
    use qwenrelay_history::Role;

    struct AutoGate;

    #[async_trait]
    impl ConfirmGate for AutoGate {
        async fn wait_for_operator(&self, _prompt: &str) {}
    }

    fn session_in(dir: &std::path::Path) -> (Arc<BrowserSession>, Dispatcher) {
        let config = Config::from_env(dir).unwrap();
        let session = Arc::new(BrowserSession::new(&config, Arc::new(AutoGate)));
        let dispatcher = Dispatcher::new(&config, session.clone());
        (session, dispatcher)
    }

    fn dispatcher_in(dir: &std::path::Path) -> Dispatcher {
        session_in(dir).1
    }

    fn fetch_success(data: Value) -> FetchOutcome {
        FetchOutcome {
            success: true,
            data: Some(data),
            error: None,
            html: None,
            status: None,
            status_text: None,
            error_body: None,
        }
    }

    #[tokio::test]
    async fn send_without_browser_records_attempt_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_in(dir.path());

        let outcome = dispatcher.send_message("hello", None, None).await;
        let SendOutcome::Failure(failure) = outcome else {
            panic!("expected a failure without a browser");
        };
        assert_eq!(failure.error, "Configuration error: Browser not initialized");
        assert!(failure.verification.is_none());

        // The user message was still persisted to the new chat.
        let chat = dispatcher.history().load(&failure.chat_id);
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn unknown_chat_id_starts_a_new_chat() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_in(dir.path());

        let outcome = dispatcher
            .send_message("hi", None, Some("no-such-chat"))
            .await;
        let SendOutcome::Failure(failure) = outcome else {
            panic!("expected a failure without a browser");
        };
        assert_ne!(failure.chat_id, "no-such-chat");
        assert!(dispatcher.history().exists(&failure.chat_id));
    }

    #[tokio::test]
    async fn repeated_sends_to_one_chat_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_in(dir.path());

        let SendOutcome::Failure(first) = dispatcher.send_message("one", None, None).await else {
            panic!("expected a failure without a browser");
        };
        let SendOutcome::Failure(second) = dispatcher
            .send_message("two", None, Some(&first.chat_id))
            .await
        else {
            panic!("expected a failure without a browser");
        };
        assert_eq!(first.chat_id, second.chat_id);

        let chat = dispatcher.history().load(&first.chat_id);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].content, "one");
        assert_eq!(chat.messages[1].content, "two");

        // Idle per-chat locks are evicted once dispatch completes.
        assert!(dispatcher.chat_locks.is_empty());
    }

    #[tokio::test]
    async fn bogus_model_still_dispatches_with_default() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_in(dir.path());

        // Model fallback happens before the browser check, so a bogus model
        // reaches the same failure point as a valid one.
        let outcome = dispatcher
            .send_message("hi", Some("definitely-not-a-model"), None)
            .await;
        let SendOutcome::Failure(failure) = outcome else {
            panic!("expected a failure without a browser");
        };
        assert_eq!(failure.error, "Configuration error: Browser not initialized");
    }

    #[test]
    fn successful_fetch_appends_assistant_reply() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_in(dir.path());

        let chat_id = dispatcher.history().create_chat(None);
        dispatcher.history().add_user_message(&chat_id, "hi");

        let outcome = fetch_success(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello back"}}],
            "usage": {"total_tokens": 9},
        }));
        let SendOutcome::Completion(completion) = dispatcher.interpret_success(&chat_id, outcome)
        else {
            panic!("expected a completion");
        };

        assert_eq!(completion.content, "hello back");
        assert_eq!(completion.chat_id, chat_id);
        assert_eq!(completion.usage["total_tokens"], 9);

        let chat = dispatcher.history().load(&chat_id);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1].role, Role::Assistant);
        assert_eq!(chat.messages[1].content, "hello back");
        assert_eq!(chat.messages[1].info["total_tokens"], 9);
    }

    #[tokio::test]
    async fn verification_reply_poisons_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (session, dispatcher) = session_in(dir.path());

        session.set_token("tok-abc");
        session.set_authenticated(true);

        let outcome = dispatcher.poison_and_report("chat-1").await;

        assert!(session.token().is_none());
        assert!(!session.is_authenticated());
        assert!(!session.has_browser().await);

        let SendOutcome::Failure(failure) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(failure.verification, Some(true));
        assert_eq!(failure.chat_id, "chat-1");
        assert!(failure.error.starts_with("Verification challenge:"));
    }
}
