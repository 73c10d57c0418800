//! QwenRelay — browser-backed HTTP proxy for the chat.qwen.ai web client.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod routes;
mod state;

use qwenrelay_browser::{BrowserSession, ConsoleGate};
use qwenrelay_core::Config;
use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("QWENRELAY_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Ask the operator how to launch when a saved session exists. Returns
/// whether the browser should start visible (fresh interactive sign-in).
async fn prompt_launch_mode(has_snapshot: bool) -> bool {
    if !has_snapshot {
        info!("No saved session found, starting with interactive sign-in");
        return true;
    }

    println!();
    println!("Saved session found. Launch mode:");
    println!("  1 - reuse the saved session (no interactive sign-in)");
    println!("  2 - fresh interactive sign-in");
    print!("Choice (1/2, default 1): ");
    let _ = std::io::stdout().flush();

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        line
    })
    .await
    .unwrap_or_default();

    let fresh = answer.trim() == "2";
    if fresh {
        info!("Starting with a fresh interactive sign-in");
    } else {
        info!("Starting with the saved session");
    }
    fresh
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = Config::from_env(&data_dir)?;
    let port = config.port;

    let session = Arc::new(BrowserSession::new(&config, Arc::new(ConsoleGate)));

    let visible = prompt_launch_mode(session.has_snapshot()).await;
    if !session.init(visible).await {
        error!("Failed to initialize the browser, exiting");
        std::process::exit(1);
    }

    let state = Arc::new(AppState::new(config, session.clone()));
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("QwenRelay listening on {}", addr);
    info!("API available at http://localhost:{}/api", port);
    info!("Authentication status: GET /api/status");
    info!("Send a message:        POST /api/chat");
    info!("List models:           GET /api/models");
    info!("Manage chats:          /api/chats, /api/chats/{{chatId}}, /api/chats/cleanup");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Termination signal received, closing the browser...");
    session.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
