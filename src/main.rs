//! switchyard, least-loaded TCP load balancer.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use switchyard::config::{Config, LISTEN_BACKLOG, MAX_BACKENDS};
use switchyard::{metadata, Acceptor, Dispatcher, Roster, ShutdownFlag, TraceForwarder};

#[derive(Parser)]
#[command(name = "switchyard", about = "Least-loaded TCP load balancer")]
struct Args {
    /// Path to the server metadata file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Per-backend connection ceiling
    #[arg(long)]
    max_connections_per_backend: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = args.config {
        config.metadata_path = path;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_connections_per_backend {
        config.max_connections = max.max(1);
    }

    // Prefer RUST_LOG, fall back to SWITCHYARD_LOG / the default level.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        metadata_path = %config.metadata_path.display(),
        port = config.port,
        max_connections = config.max_connections,
        "configuration loaded"
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    let specs = metadata::load_or_prompt(
        &config.metadata_path,
        MAX_BACKENDS,
        &mut stdin.lock(),
        &mut stdout.lock(),
    )
    .context("could not load server metadata")?;
    info!(backends = specs.len(), "metadata parsed");

    let shutdown = Arc::new(ShutdownFlag::new());
    let roster = Arc::new(Roster::bootstrap(
        &specs,
        config.max_connections,
        Arc::new(TraceForwarder),
        Arc::clone(&shutdown),
    )?);

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    let acceptor = Acceptor::bind(
        addr,
        LISTEN_BACKLOG,
        Dispatcher::new(Arc::clone(&roster)),
        Arc::clone(&shutdown),
    )?;

    acceptor.run().context("acceptor loop failed")?;

    // Unreachable in normal operation; the loop only returns once the
    // shutdown flag is raised.
    roster.shutdown();
    Ok(())
}
