//! wspipe - carry stdin/stdout over a WebSocket tunnel
//!
//! Typically used as an SSH `ProxyCommand`:
//!
//! ```text
//! ssh -o 'ProxyCommand=wspipe wss://tunnel.example.com/proxy/%h/%p' db-host
//! ```

mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wspipe_bridge::BridgeOptions;
use wspipe_transport::DuplexConnection;

use crate::settings::{parse_duration, Settings};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// wspipe - Bridge stdin/stdout to a WebSocket tunnel endpoint
#[derive(Parser, Debug)]
#[command(name = "wspipe")]
#[command(about = "Bridge stdin/stdout to a WebSocket tunnel endpoint")]
#[command(version, long_version = LONG_VERSION)]
#[command(long_about = r#"
Dial a WebSocket tunnel endpoint (ws:// or wss://) and bridge it with
stdin/stdout. Every message in either direction is binary. Local EOF sends
a normal closure; the process exits 0 on a clean shutdown and 1 otherwise.

EXAMPLES:
  # As an SSH ProxyCommand
  ssh -o 'ProxyCommand=wspipe --auth @$HOME/.wspipe-auth wss://tunnel.example.com/proxy/%h/%p' db-host

  # Through an authenticated forward proxy
  wspipe --fproxy http://proxy.corp:3128 --fpauth @/etc/wspipe/proxy \
    wss://tunnel.example.com/proxy/localhost/22

CREDENTIALS:
  --auth and --fpauth take either "user:pass" or "@path". A referenced file
  holds "user:pass" and must not be writable or executable by anyone but
  its owner (e.g. mode 0600 or 0400).

ENVIRONMENT VARIABLES:
  WSPIPE_AUTH    Credential for the tunnel endpoint
  WSPIPE_FPROXY  Forward proxy URL
  WSPIPE_FPAUTH  Credential for the forward proxy
  RUST_LOG       Log filter (logs go to stderr)
"#)]
struct Cli {
    /// Tunnel endpoint URL (ws:// or wss://)
    target_url: String,

    /// Bound on sending the close message (e.g. 500ms, 10s, 1m)
    #[arg(
        long = "write_timeout",
        visible_alias = "write-timeout",
        value_parser = parse_duration,
        default_value = "10s"
    )]
    write_timeout: Duration,

    /// Tunnel endpoint credential: "user:pass" or "@path"
    #[arg(long, env = "WSPIPE_AUTH", hide_env_values = true)]
    auth: Option<String>,

    /// Forward proxy URL (http://host:port)
    #[arg(long, env = "WSPIPE_FPROXY")]
    fproxy: Option<String>,

    /// Forward proxy credential: "user:pass" or "@path"
    #[arg(long, env = "WSPIPE_FPAUTH", hide_env_values = true)]
    fpauth: Option<String>,

    /// Client certificate chain (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Client certificate private key (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Verbose logging; include the response body when the upgrade is rejected
    #[arg(short, long)]
    verbose: bool,

    /// Skip server certificate verification (insecure)
    #[arg(long = "insecure_conn", visible_alias = "insecure-conn")]
    insecure_conn: bool,
}

/// Setup logging on stderr; stdout carries tunnel data
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .init();
}

/// Dial, bridge, and return the process exit status
async fn run(cli: Cli) -> Result<i32> {
    let settings = Settings::from_cli(cli).context("Invalid arguments")?;
    let config = settings.dial_config()?;

    let connection = wspipe_transport_websocket::establish(&config)
        .await
        .context("Failed to connect")?;
    info!(
        "[{}] Connected to {}",
        connection.connection_id(),
        config.target()
    );

    let options = BridgeOptions {
        write_timeout: settings.write_timeout,
        ..Default::default()
    };
    let outcome = wspipe_bridge::run(
        connection,
        tokio::io::stdin(),
        tokio::io::stdout(),
        options,
    )
    .await;

    info!(
        "Bridge finished: {:?} (local->remote {:?}, remote->local {:?})",
        outcome.state, outcome.bridge.local_to_remote, outcome.bridge.remote_to_local
    );
    Ok(outcome.exit_code())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if cli.verbose {
        info!("wspipe {}", LONG_VERSION);
    }

    let code = run(cli).await.unwrap_or_else(|e| {
        error!("{:#}", e);
        1
    });

    // A blocked stdin read would keep the runtime alive on shutdown.
    std::process::exit(code);
}
