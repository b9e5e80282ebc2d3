use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use packgate::auth::invitations;
use packgate::{
    build_directory, config, AppState, CgiSupervisor, InvitationStore, MetricsRegistry,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "packgate", about = "Git Smart-HTTP hosting gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/packgate/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: Arc<AppState>) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let app = packgate::create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    let config = Arc::new(config);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting packgate");

    // ---- Ensure the repository root exists ----
    tokio::fs::create_dir_all(&config.repositories.root)
        .await
        .with_context(|| {
            format!(
                "failed to create repository root: {}",
                config.repositories.root.display()
            )
        })?;

    // ---- Directory backend ----
    let directory = build_directory(&config)?;
    tracing::info!(mode = ?config.directory.mode, "directory backend initialised");

    // ---- HTTP client (used by the CGI reverse proxy) ----
    let http_client = reqwest::Client::builder()
        .user_agent("packgate/0.1")
        .build()
        .context("failed to build reqwest client")?;

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Invitation store ----
    let invitations = Arc::new(InvitationStore::new(Duration::from_secs(
        config.invitations.ttl,
    )));

    // ---- App state ----
    let state = Arc::new(AppState {
        supervisor: CgiSupervisor::new(&config),
        config: Arc::clone(&config),
        directory,
        invitations: Arc::clone(&invitations),
        http_client,
        metrics,
    });

    // ---- Invitation sweeper ----
    let sweep_interval = Duration::from_secs(config.invitations.sweep_interval);
    tokio::spawn(invitations::run_sweeper(invitations, sweep_interval));

    // ---- HTTP server ----
    run_http_server(state).await?;

    tracing::info!("packgate shut down cleanly");
    Ok(())
}
