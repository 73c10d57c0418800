//! Browser session manager — owns the single Chromium process, its pooled
//! pages, the in-memory token, and snapshot capture/restore.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use qwenrelay_core::{Config, Error, Result, SiteConfig};
use qwenrelay_session::{SessionSnapshot, SnapshotStore, StoredCookie, TokenStore};

use crate::auth::{AuthState, ConfirmGate};
use crate::launch;
use crate::pool::CdpPagePool;

/// Pause between teardown steps during a restart, letting the prior process
/// release its resources.
const RESTART_SETTLE: Duration = Duration::from_secs(1);

struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// Explicit session context: token, auth state, browser handle and page pool
/// in one place, shared via `Arc` instead of module-level globals.
pub struct BrowserSession {
    pub(crate) site: SiteConfig,
    tokens: TokenStore,
    snapshots: SnapshotStore,
    pub(crate) gate: Arc<dyn ConfirmGate>,
    pub(crate) state: RwLock<AuthState>,
    token: RwLock<Option<String>>,
    browser: tokio::sync::Mutex<Option<BrowserHandle>>,
    pool: CdpPagePool,
    /// Serializes authentication flows; only one may run at a time.
    pub(crate) auth_lock: tokio::sync::Mutex<()>,
}

impl BrowserSession {
    pub fn new(config: &Config, gate: Arc<dyn ConfirmGate>) -> Self {
        let tokens = TokenStore::new(&config.data_paths.token_file);
        let token = tokens.load();
        Self {
            site: config.site.clone(),
            tokens,
            snapshots: SnapshotStore::new(&config.data_paths.snapshot_file),
            gate,
            state: RwLock::new(AuthState::Unauthenticated),
            token: RwLock::new(token),
            browser: tokio::sync::Mutex::new(None),
            pool: CdpPagePool::default(),
            auth_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ---------------------------------------------------------------
    // Observable state
    // ---------------------------------------------------------------

    pub fn is_authenticated(&self) -> bool {
        *self.state.read() == AuthState::Authenticated
    }

    pub(crate) fn set_state(&self, state: AuthState) {
        *self.state.write() = state;
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.set_state(if authenticated {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        });
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Record a freshly acquired token and persist it.
    pub fn set_token(&self, token: &str) {
        *self.token.write() = Some(token.to_string());
        self.tokens.save(token);
    }

    /// Drop the in-memory token (session poisoning); the file is left in
    /// place and overwritten on the next successful acquisition.
    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    pub async fn has_browser(&self) -> bool {
        self.browser.lock().await.is_some()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshots.exists()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Launch the browser if not already running. Visible mode starts the
    /// interactive login flow; headless mode restores the saved snapshot and,
    /// on success, marks the session authenticated.
    pub async fn init(&self, visible: bool) -> bool {
        if !self.launch_browser(visible).await {
            return false;
        }
        if visible {
            self.start_manual_authentication().await;
        } else {
            self.try_restore_snapshot().await;
        }
        true
    }

    /// Launch only; no auth orchestration. No-op when already running.
    async fn launch_browser(&self, visible: bool) -> bool {
        let mut guard = self.browser.lock().await;
        if guard.is_some() {
            return true;
        }
        info!("Launching browser ({})", if visible { "visible" } else { "headless" });
        match launch::launch(visible).await {
            Ok((browser, handler_task)) => {
                *guard = Some(BrowserHandle {
                    browser,
                    handler_task,
                });
                true
            }
            Err(e) => {
                error!("Failed to initialize browser: {}", e);
                false
            }
        }
    }

    /// Persist the token and session snapshot, tear everything down, then
    /// relaunch headless. The only path from interactive to unattended mode.
    pub async fn restart_headless(&self) {
        info!("Restarting browser in headless mode...");

        match self.token() {
            Some(token) => {
                self.tokens.save(&token);
            }
            None => warn!("No auth token extracted before browser restart"),
        }
        if let Ok(page) = self.new_page(&self.site.landing_url).await {
            let _ = page.wait_for_navigation().await;
            self.persist_snapshot_from(&page).await;
            let _ = page.close().await;
        }
        tokio::time::sleep(RESTART_SETTLE).await;

        self.shutdown().await;
        tokio::time::sleep(RESTART_SETTLE).await;

        if self.launch_browser(false).await {
            self.try_restore_snapshot().await;
            info!("Browser restarted in headless mode");
        }
    }

    /// Drain the page pool, close the browser and its event task, reset to
    /// "absent". Every step swallows its own errors so a partial teardown
    /// never blocks the rest.
    pub async fn shutdown(&self) {
        self.pool.drain().await;

        let handle = self.browser.lock().await.take();
        if let Some(mut handle) = handle {
            if let Err(e) = handle.browser.close().await {
                warn!("Error closing browser: {}", e);
            }
            let _ = handle.browser.wait().await;
            handle.handler_task.abort();
            info!("Browser closed");
        }
    }

    // ---------------------------------------------------------------
    // Pages
    // ---------------------------------------------------------------

    /// Open a page on the given URL. Absence of a browser is a hard
    /// configuration error for callers.
    pub(crate) async fn new_page(&self, url: &str) -> Result<Page> {
        let guard = self.browser.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| Error::Config("Browser not initialized".into()))?;
        handle
            .browser
            .new_page(url)
            .await
            .map_err(|e| Error::Browser(format!("Failed to open page: {e}")))
    }

    /// Take a pooled page, or create one navigated to the landing URL. When
    /// no token is known yet, tries a one-time extraction from the fresh
    /// page; extraction failure does not fail acquisition.
    pub async fn acquire_page(&self) -> Result<Page> {
        if let Some(page) = self.pool.take().await {
            return Ok(page);
        }

        let page = self.new_page(&self.site.landing_url).await?;
        let _ = page.wait_for_navigation().await;

        if self.token().is_none() {
            match self.pull_token_from_page(&page).await {
                Some(token) => {
                    info!("Auth token obtained from browser storage");
                    self.set_token(&token);
                }
                None => warn!("No auth token present in browser storage"),
            }
        }

        Ok(page)
    }

    /// Return a page to the pool (closing it if the pool is full).
    pub async fn release_page(&self, page: Page) {
        self.pool.release(page).await;
    }

    /// Close all pooled pages; used on teardown and session poisoning.
    pub async fn drain_pool(&self) {
        self.pool.drain().await;
    }

    // ---------------------------------------------------------------
    // Token extraction
    // ---------------------------------------------------------------

    /// Read the bearer token from the page's localStorage.
    pub async fn pull_token_from_page(&self, page: &Page) -> Option<String> {
        let key = serde_json::to_string(&self.site.token_storage_key).ok()?;
        let js = format!("localStorage.getItem({key})");
        match page.evaluate(js).await {
            Ok(result) => result
                .into_value::<Option<String>>()
                .ok()
                .flatten()
                .filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Failed to read token from page storage: {}", e);
                None
            }
        }
    }

    /// Extract and persist the token via a dedicated page. Returns the
    /// cached token immediately when one is already known.
    pub async fn extract_token(&self) -> Option<String> {
        if let Some(token) = self.token() {
            return Some(token);
        }

        let page = match self.new_page(&self.site.landing_url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Token extraction failed to open a page: {}", e);
                return None;
            }
        };
        let _ = page.wait_for_navigation().await;

        let token = self.pull_token_from_page(&page).await;
        let _ = page.close().await;

        match token {
            Some(token) => {
                info!("Auth token extracted successfully");
                self.set_token(&token);
                Some(token)
            }
            None => {
                warn!("Auth token not found in browser");
                None
            }
        }
    }

    // ---------------------------------------------------------------
    // Snapshot capture / restore
    // ---------------------------------------------------------------

    /// Serialize cookies and landing-origin localStorage from a live page.
    pub async fn capture_snapshot(&self, page: &Page) -> Result<SessionSnapshot> {
        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| Error::Browser(format!("Failed to read cookies: {e}")))?
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                same_site: c.same_site.map(|s| format!("{s:?}")),
            })
            .collect();

        let js = r#"(() => {
            const out = {};
            for (let i = 0; i < localStorage.length; i++) {
                const k = localStorage.key(i);
                out[k] = localStorage.getItem(k);
            }
            return out;
        })()"#;
        let local_storage: HashMap<String, String> = page
            .evaluate(js)
            .await
            .map_err(|e| Error::Browser(format!("Failed to read localStorage: {e}")))?
            .into_value()
            .unwrap_or_default();

        Ok(SessionSnapshot {
            cookies,
            local_storage,
            captured_at: Some(chrono::Utc::now().timestamp()),
        })
    }

    /// Best-effort capture + save; failures are logged, not propagated.
    pub(crate) async fn persist_snapshot_from(&self, page: &Page) -> bool {
        match self.capture_snapshot(page).await {
            Ok(snapshot) => self.snapshots.save(&snapshot),
            Err(e) => {
                warn!("Failed to capture session snapshot: {}", e);
                false
            }
        }
    }

    /// Apply the saved snapshot into the fresh browser and mark the session
    /// authenticated on success. Failure leaves state untouched.
    async fn try_restore_snapshot(&self) {
        let Some(snapshot) = self.snapshots.load() else {
            warn!("No saved session snapshot to restore");
            return;
        };
        if snapshot.is_empty() {
            warn!("Saved session snapshot is empty, skipping restore");
            return;
        }

        match self.apply_snapshot(&snapshot).await {
            Ok(()) => {
                self.set_authenticated(true);
                info!("Session restored from snapshot, authentication flag set");
            }
            Err(e) => warn!("Failed to restore saved session: {}", e),
        }
    }

    /// One-shot page for the replay; closed on every exit path.
    async fn apply_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let page = self.new_page("about:blank").await?;
        let replayed = self.replay_snapshot(&page, snapshot).await;
        crate::pool::close_with(page, replayed).await?;

        // Tokens in the snapshot take effect immediately.
        if self.token().is_none() {
            if let Some(token) = snapshot.local_storage.get(&self.site.token_storage_key) {
                if !token.is_empty() {
                    self.set_token(token);
                }
            }
        }

        Ok(())
    }

    async fn replay_snapshot(&self, page: &Page, snapshot: &SessionSnapshot) -> Result<()> {
        let cookies: Vec<CookieParam> = snapshot
            .cookies
            .iter()
            .map(|c| {
                let mut cookie = CookieParam::new(c.name.clone(), c.value.clone());
                cookie.domain = Some(c.domain.clone());
                cookie.path = Some(c.path.clone());
                cookie.secure = Some(c.secure);
                cookie.http_only = Some(c.http_only);
                cookie
            })
            .collect();
        if !cookies.is_empty() {
            page.set_cookies(cookies)
                .await
                .map_err(|e| Error::Browser(format!("Failed to set cookies: {e}")))?;
        }

        // localStorage can only be written from the target origin.
        page.goto(self.site.landing_url.as_str())
            .await
            .map_err(|e| Error::Browser(format!("Failed to open landing page: {e}")))?;
        let _ = page.wait_for_navigation().await;

        if !snapshot.local_storage.is_empty() {
            let entries = serde_json::to_string(&snapshot.local_storage)?;
            let js = format!(
                r#"(function(entries) {{
                    for (const [k, v] of Object.entries(entries)) {{
                        try {{ localStorage.setItem(k, v); }} catch (_) {{}}
                    }}
                    return true;
                }})({entries})"#
            );
            page.evaluate(js)
                .await
                .map_err(|e| Error::Browser(format!("Failed to write localStorage: {e}")))?;
        }

        Ok(())
    }

    /// Drop every piece of shared session state after a verification
    /// challenge: auth flag, pooled pages, in-memory token, and the browser
    /// itself. The caller decides whether to relaunch.
    pub async fn invalidate(&self) {
        self.set_authenticated(false);
        self.pool.drain().await;
        self.clear_token();
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ConfirmGate;
    use async_trait::async_trait;

    struct AutoGate;

    #[async_trait]
    impl ConfirmGate for AutoGate {
        async fn wait_for_operator(&self, _prompt: &str) {}
    }

    #[tokio::test]
    async fn test_invalidate_drops_all_session_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_env(dir.path()).unwrap();
        let session = BrowserSession::new(&config, Arc::new(AutoGate));

        session.set_token("tok-123");
        session.set_authenticated(true);
        assert!(session.is_authenticated());

        session.invalidate().await;

        assert!(session.token().is_none());
        assert!(!session.is_authenticated());
        assert!(!session.has_browser().await);
    }
}
