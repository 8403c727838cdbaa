//! Offsync Server
//!
//! Serves the `/sync/*` endpoints over HTTP and mints bearer tokens.
//!
//! # Commands
//!
//! - `serve` - Run the sync server
//! - `mint-token` - Print a bearer token for a client

use clap::{Parser, Subcommand};
use offsync_core::{Clock, SystemClock};
use offsync_protocol::ClientId;
use offsync_server::{router, AuthConfig, ServerConfig, SyncServer, TokenValidator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Offline-first sync server.
#[derive(Parser)]
#[command(name = "offsync-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Token signing secret
        #[arg(short, long, required_unless_present = "insecure_open")]
        secret: Option<String>,

        /// Accept requests without a bearer token (local testing only)
        #[arg(long, conflicts_with = "secret")]
        insecure_open: bool,

        /// Token lifetime in seconds
        #[arg(long, default_value = "86400")]
        token_expiry_secs: u64,

        /// Sustained `GET /sync/status` requests per second per token
        #[arg(long, default_value = "5")]
        status_rps: u32,

        /// Burst allowance for `GET /sync/status`
        #[arg(long, default_value = "10")]
        status_burst: u32,

        /// Maximum operations per batch
        #[arg(long, default_value = "100")]
        max_batch: usize,
    },

    /// Print a bearer token for a client
    MintToken {
        /// Client id (uuid)
        #[arg(short, long)]
        client: ClientId,

        /// Token signing secret, as passed to `serve`
        #[arg(short, long)]
        secret: String,

        /// Token lifetime in seconds
        #[arg(long, default_value = "86400")]
        token_expiry_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default = if cli.verbose {
        "offsync_server=debug,tower_http=debug"
    } else {
        "offsync_server=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            secret,
            insecure_open,
            token_expiry_secs,
            status_rps,
            status_burst,
            max_batch,
        } => {
            let mut config = ServerConfig::new(bind)
                .with_token_expiry(Duration::from_secs(token_expiry_secs))
                .with_status_rate(status_rps, status_burst)
                .with_max_batch(max_batch);
            match secret {
                Some(secret) => config = config.with_auth(secret.into_bytes()),
                None if insecure_open => {
                    tracing::warn!("--insecure-open given, requests are not authenticated");
                    config = config.with_open_access();
                }
                None => return Err("either --secret or --insecure-open is required".into()),
            }
            serve(config).await?;
        }
        Commands::MintToken {
            client,
            secret,
            token_expiry_secs,
        } => {
            let validator = TokenValidator::new(
                AuthConfig::new(secret.into_bytes())
                    .with_expiry(Duration::from_secs(token_expiry_secs)),
            );
            println!("{}", validator.create_token(client, SystemClock.now_ms())?);
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr;
    let server = Arc::new(SyncServer::new(config));
    let app = router(server);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("offsync-server v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
