//! don: Docker network plugin backed by Open vSwitch
//!
//! Registers a `NetworkDriver` plugin socket with Docker and maps each
//! Docker network to an OVS bridge.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use don_driver::config::{load_environment, DriverConfig};
use don_driver::plugin::create_router;
use don_driver::server::{SocketServer, SocketServerConfig};
use don_driver::Driver;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "don")]
#[command(about = "Docker network driver for Open vSwitch")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Driver name, also the plugin socket name
    #[arg(long)]
    name: Option<String>,

    /// Directory Docker scans for plugin sockets
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Group owning the plugin socket
    #[arg(long)]
    gid: Option<u32>,

    /// OVSDB endpoint (unix:/path or tcp:host:port)
    #[arg(long)]
    ovsdb: Option<String>,

    /// Give up reaching OVSDB after this many seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Docker daemon socket
    #[arg(long)]
    docker_socket: Option<PathBuf>,

    /// Run without the Docker client (no recovery of networks after a restart)
    #[arg(long)]
    no_docker: bool,
}

impl Args {
    /// Flags take precedence over the environment
    fn apply(&self, config: &mut DriverConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(dir) = &self.plugin_dir {
            config.plugin_dir = dir.clone();
        }
        if self.gid.is_some() {
            config.socket_gid = self.gid;
        }
        if let Some(endpoint) = &self.ovsdb {
            config.ovsdb.endpoint = Some(endpoint.clone());
        }
        if let Some(secs) = self.connect_timeout {
            config.ovsdb.connect_max_elapsed_secs = secs;
        }
        if let Some(socket) = &self.docker_socket {
            config.docker.socket = socket.clone();
        }
        if self.no_docker {
            config.docker.enabled = false;
        }
    }
}

/// RUST_LOG as currently set, with our crates pinned to the flag level
fn env_filter(args: &Args) -> Result<EnvFilter> {
    let level = if args.debug { "debug" } else { "info" };
    Ok(EnvFilter::from_default_env()
        .add_directive(format!("don={}", level).parse()?)
        .add_directive(format!("don_driver={}", level).parse()?)
        .add_directive(format!("don_network={}", level).parse()?))
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = env_filter(args)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/don/environment (if exists), RUST_LOG included
    let env_file = load_environment();

    let args = Args::parse();
    init_tracing(&args)?;
    if let Some(path) = env_file {
        info!("Loaded environment from {}", path);
    }

    let mut config = DriverConfig::from_env();
    args.apply(&mut config);
    info!("Starting driver '{}' ({:?})", config.name, config);

    let driver = Driver::connect(&config)
        .await
        .context("Failed to initialize driver")?;

    let server = SocketServer::new(
        SocketServerConfig {
            socket_path: config.socket_path(),
            gid: config.socket_gid,
        },
        create_router(Arc::new(driver)),
    );
    server.serve(shutdown_signal()).await?;

    info!("Driver stopped");
    Ok(())
}
