//! tandem-server: session coordination for synchronized playback.
//!
//! Accepts WebSocket connections from hosts and clients, keeps session
//! membership and presence, relays playback commands and gates the host on
//! client readiness.

mod auth;
mod config;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{JoinPolicy, ServerConfig};
use server::TandemServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// tandem-server: synchronized playback coordinator
#[derive(Parser, Debug)]
#[command(name = "tandem-server", version, about = "Synchronized playback session server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.tandem/config.toml")]
    config: String,

    /// Maximum clients per session
    #[arg(long)]
    max_clients: Option<usize>,

    /// Host reconnection grace period in seconds
    #[arg(long)]
    grace_period: Option<u64>,

    /// Whether clients may join a session that has no host
    #[arg(long, value_enum)]
    join_policy: Option<JoinPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting tandem-server");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.bind.as_deref(),
        cli.max_clients,
        cli.grace_period,
        cli.join_policy,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = TandemServer::new(server_config);
    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
