//! Shared application state.

use std::sync::Arc;

use qwenrelay_browser::BrowserSession;
use qwenrelay_chat::Dispatcher;
use qwenrelay_core::Config;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Config,
    pub session: Arc<BrowserSession>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Config, session: Arc<BrowserSession>) -> Self {
        let dispatcher = Dispatcher::new(&config, session.clone());
        Self {
            config,
            session,
            dispatcher,
        }
    }
}
