// Allow dead code - several helpers are kept for API completeness
#![allow(dead_code)]

//! meshdns - per-node DNS subsystem for a VPN mesh
//!
//! Runs the stub DNS server every mesh node answers local queries on,
//! keeps the peer directory the control plane pushes into it, and
//! synthesizes the OS resolver file from the declarative DNS policy.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        MESHDNS NODE                        │
//! ├────────────────────────────────────────────────────────────┤
//! │  HTTP API (8080)       ←── control plane pushes directory │
//! │                            and policy snapshots           │
//! │  Peer Directory        ←── copy-on-write FQDN index       │
//! │  Record Resolver       ←── directory → static → split →   │
//! │                            global strategy chain          │
//! │  Stub DNS server (53)  ←── local processes' DNS queries   │
//! │  Resolver-file writer  ←── synthesizes /etc/resolv.conf   │
//! └────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod api;
mod config;
mod directory;
mod dns;
mod policy;
mod resolvconf;
mod resolver;

use api::{ApiState, Metrics};
use config::ServiceConfig;
use directory::PeerDirectory;
use policy::PolicyHandle;
use resolver::{Resolver, UdpUpstream};

/// meshdns - per-node DNS resolution and resolver-config service
#[derive(Parser, Debug)]
#[command(name = "meshdnsd")]
#[command(author = "meshdns contributors")]
#[command(version = "0.1.0")]
#[command(about = "Per-node DNS subsystem for a VPN mesh", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "meshdns.toml")]
    config: PathBuf,

    /// Stub DNS server port (requires CAP_NET_BIND_SERVICE for port 53)
    #[arg(long)]
    dns_port: Option<u16>,

    /// HTTP API port for control-plane pushes and metrics
    #[arg(long)]
    api_port: Option<u16>,

    /// Path of the OS resolver file to synthesize
    #[arg(long)]
    resolv_conf: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🌐 meshdns v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        ServiceConfig::load(&args.config)?
    } else {
        warn!("config file not found, using defaults");
        ServiceConfig::default()
    };

    // Override config with CLI args
    let mut config = config.with_resolv_conf_path(args.resolv_conf);
    if let Some(port) = args.dns_port {
        config = config.with_dns_port(port);
    }
    if let Some(port) = args.api_port {
        config = config.with_api_port(port);
    }

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   DNS port: {}", config.dns_port);
    info!("   API port: {}", config.api_port);
    info!("   Upstream timeout: {}ms", config.upstream_timeout_ms);
    info!("   Resolver file: {:?}", config.resolv_conf_path);

    let config = Arc::new(config);

    // Apply the initial policy: resolver file first, then shared state
    resolvconf::apply(&config.policy, &config.resolv_conf_path).await?;

    let directory = Arc::new(PeerDirectory::new(&config.policy.base_domain));
    let policy = Arc::new(PolicyHandle::new(config.policy.clone()));
    let metrics = Arc::new(Metrics::new());

    let resolver = Arc::new(Resolver::new(
        directory.clone(),
        policy.clone(),
        Arc::new(UdpUpstream),
        config.upstream_port,
        Duration::from_millis(config.upstream_timeout_ms),
    ));

    // Start the stub server and the control/observability API
    let dns_listen = SocketAddr::from(([0, 0, 0, 0], config.dns_port));
    let dns_handle = tokio::spawn(dns::run_dns_server(
        dns_listen,
        resolver.clone(),
        metrics.clone(),
    ));

    let api_state = Arc::new(ApiState {
        config: config.clone(),
        directory,
        policy,
        resolver,
        metrics,
        resolv_conf_path: config.resolv_conf_path.clone(),
    });
    let api_handle = tokio::spawn(api::run_api_server(api_state));

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = dns_handle => {
            error!("stub DNS server exited: {result:?}");
        }
        result = api_handle => {
            error!("HTTP API exited: {result:?}");
        }
    }

    info!("👋 meshdns shutting down");
    Ok(())
}
