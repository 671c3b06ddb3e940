//! relay-dump: Print every cluster on a relay and its members.

use anyhow::{Context, Result};
use clap::Parser;
use relay_client::{ClientConfig, ConnectionManager};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-dump")]
#[command(about = "Dump cluster membership of a relay")]
struct Args {
    /// Relay host
    #[arg(long, env = "RELAY_HOST", default_value = "localhost")]
    host: String,

    /// Relay port
    #[arg(short, long, env = "RELAY_PORT", default_value_t = 50051)]
    port: u16,

    /// Trusted relay certificate (PEM); enables TLS
    #[arg(long, env = "RELAY_CERT")]
    cert: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::new(args.host, args.port);
    if let Some(cert) = args.cert {
        config = config.with_server_cert(cert);
    }
    let target = config.target();

    let manager = ConnectionManager::new(config).context("Invalid client configuration")?;
    let text = manager
        .dump()
        .await
        .with_context(|| format!("Failed to dump {}", target))?;
    print!("{}", text);
    Ok(())
}
