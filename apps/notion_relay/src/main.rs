use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

mod adapters;
mod config;
mod delivery;
mod directory;
mod handlers;
mod models;
mod utils;

use delivery::{BotToken, DiscordClient, DEFAULT_API_BASE};
use directory::DirectoryTable;
use handlers::{router, ApiDoc, AppState};

#[derive(Debug, Parser)]
#[command(name = "notion-relay", version)]
struct Args {
    #[arg(long, env = "NOTION_RELAY_BIND", default_value = "0.0.0.0:3000")]
    bind: String,
    /// JSON file with a `relays` map. Built-in presets are used when omitted.
    #[arg(long, env = "NOTION_RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// JSON object mapping Notion display names to Discord user ids.
    #[arg(long, env = "NOTION_RELAY_DIRECTORY")]
    directory: Option<PathBuf>,
    #[arg(long, env = "DISCORD_WEBHOOK_URL", hide_env_values = true)]
    webhook_url: Option<String>,
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,
    #[arg(long, env = "DISCORD_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,
    #[arg(long, env = "DISCORD_DEBUG_WEBHOOK_URL", hide_env_values = true)]
    debug_webhook_url: Option<String>,
    #[arg(long, env = "NOTION_RELAY_HTTP_TIMEOUT_SECS", default_value_t = 10)]
    http_timeout_secs: u64,
    #[arg(long)]
    generate_openapi: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let args = Args::parse();

    if args.generate_openapi {
        println!("{}", ApiDoc::openapi().to_pretty_json()?);
        return Ok(());
    }

    let relays = match &args.config {
        Some(path) => config::load_relays(path)?,
        None => config::preset_relays(),
    };

    let directory = match &args.directory {
        Some(path) => DirectoryTable::load(path)?,
        None => DirectoryTable::default(),
    };
    if directory.is_empty() {
        tracing::warn!("user directory is empty; every recipient will be unmapped");
    } else {
        tracing::info!(entries = directory.len(), "user directory loaded");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.http_timeout_secs))
        .build()?;

    let state = AppState {
        relays: Arc::new(relays),
        directory: Arc::new(directory),
        discord: DiscordClient::new(
            http,
            args.api_base,
            non_empty(args.bot_token).map(BotToken::new),
        ),
        webhook_url: non_empty(args.webhook_url),
        debug_webhook_url: non_empty(args.debug_webhook_url),
    };

    for (name, relay) in state.relays.iter() {
        match state.missing_configuration(relay) {
            Some(setting) => tracing::warn!(
                relay = %name,
                setting,
                "relay is missing a required setting and will answer 500"
            ),
            None => tracing::info!(relay = %name, mode = ?relay.mode, "relay ready"),
        }
    }

    let app = router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!("listening on {}", args.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Blank environment variables count as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM signal, shutting down gracefully");
        },
    }
}
