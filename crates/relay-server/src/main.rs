//! relay-server: Cluster membership relay.
//!
//! Members connect over WebSocket, join named clusters, and receive a new
//! view whenever membership changes. Messages are forwarded to one member or
//! to the whole cluster.

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(about = "Cluster membership relay")]
struct Args {
    /// JSON configuration file; flags override its values
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(short, long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// Port to listen on (default: 50051)
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// TLS certificate chain (PEM); requires --key
    #[arg(long, env = "RELAY_CERT", requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM); requires --cert
    #[arg(long, env = "RELAY_KEY", requires = "cert")]
    key: Option<PathBuf>,

    /// Milliseconds a write to one member may take before it is removed
    #[arg(long, env = "RELAY_SEND_TIMEOUT_MS")]
    send_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(send_timeout_ms) = self.send_timeout_ms {
            config.send_timeout_ms = send_timeout_ms;
        }
        if let (Some(cert), Some(key)) = (self.cert, self.key) {
            config = config.with_tls(cert, key);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,relay_server=debug"
    } else {
        "info,relay_server=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting relay-server");

    let config = args.into_config()?;
    let server = RelayServer::from_config(&config).context("Invalid relay configuration")?;
    let listen_addr = config.listen_addr()?;
    let listener = RelayServer::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;

    info!("Relay running. Press Ctrl+C to stop.");

    let server = Arc::new(server);
    tokio::select! {
        _ = Arc::clone(&server).run(listener) => {}

        // Handle graceful shutdown
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down ({} cluster(s) active)", server.registry().cluster_count());
    Ok(())
}
