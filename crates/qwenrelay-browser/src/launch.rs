//! Chromium process launch — executable discovery and CDP wiring.

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use qwenrelay_core::{Error, Result};

/// Desktop user agent presented by every page.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";

pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 800;

/// Launch a Chromium process and spawn the task draining its CDP event
/// stream. Visible mode shows the window for interactive login.
pub async fn launch(visible: bool) -> Result<(Browser, JoinHandle<()>)> {
    let chrome_path = find_chrome().ok_or_else(|| {
        Error::Browser("Chrome/Chromium not found; install Chrome or Chromium".into())
    })?;

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .arg(format!("--user-agent={USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-first-run")
        .arg("--no-default-browser-check");
    if visible {
        builder = builder.with_head();
    }
    let config = builder
        .build()
        .map_err(|e| Error::Browser(format!("Failed to configure browser: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| Error::Browser(format!("Failed to launch browser: {e}")))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("CDP handler event error: {}", e);
            }
        }
    });

    Ok((browser, handler_task))
}

/// Find a Chrome/Chromium executable via `which` and well-known paths.
fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }

    warn!("No Chrome executable found in PATH or standard locations");
    None
}
