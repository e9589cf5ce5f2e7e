//! RelayStore -- multi-site object storage gateway.
//!
//! Crash-only design: every startup is a recovery.  SIGTERM/SIGINT only
//! stop accepting connections and wait for in-flight requests, bounded by
//! the configured shutdown timeout.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use relaystore::config::{Config, LoggingConfig};

/// Command-line arguments for the RelayStore server.
#[derive(Parser, Debug)]
#[command(
    name = "relaystore",
    version,
    about = "Multi-site object storage gateway"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "relaystore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config: Config = relaystore::config::load_config(&cli.config)?;
    init_logging(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        relaystore::metrics::init_metrics()?;
        relaystore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let catalog = relaystore::metadata::open_catalog(&config.metadata)?;
    info!(engine = %config.metadata.engine, "object catalog ready");

    let storage = relaystore::storage::open_storage(&config.storage)?;
    info!(backend = %config.storage.backend, "storage backend ready");

    let peer = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.replicator.connect_timeout))
        .build()?;
    if config.replicator.peer_url.is_empty() {
        warn!("no peer site configured; remote reads will be refused");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(relaystore::AppState::new(config, catalog, storage, peer));
    let app = relaystore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("RelayStore listening on {}", bind_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let serving = tokio::spawn(async move { server.await });

    // Once a signal arrives, in-flight requests get `shutdown_timeout`.
    tokio::select! {
        joined = serving => joined??,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => warn!("shutdown timeout elapsed with requests still in flight"),
    }

    info!("RelayStore shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
