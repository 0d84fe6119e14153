//! Balancer configuration.
//!
//! Deployment defaults live here; everything can be overridden through
//! `SWITCHYARD_*` environment variables, and the CLI flags in `main.rs`
//! override both.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Maximum number of backends the roster will hold.
pub const MAX_BACKENDS: usize = 10;

/// Default port the acceptor listens on.
pub const DEFAULT_PORT: u16 = 1800;

/// Listen backlog for the acceptor socket.
pub const LISTEN_BACKLOG: i32 = 100;

/// Default per-backend connection ceiling.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default path to the server metadata file.
pub const DEFAULT_METADATA_PATH: &str = "./servers_metadata.txt";

/// Read buffer size for draining client sockets.
pub const READ_BUF_LEN: usize = 1024;

/// Timeout for readiness polls. Debug builds use a wider window so the
/// engine is easier to follow under a tracer.
pub const POLL_TIMEOUT_MS: i32 = if cfg!(debug_assertions) { 500 } else { 100 };

/// Balancer configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the server metadata file.
    pub metadata_path: PathBuf,

    /// Port the acceptor listens on.
    pub port: u16,

    /// Per-backend connection ceiling.
    pub max_connections: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from(DEFAULT_METADATA_PATH),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let metadata_path = std::env::var("SWITCHYARD_METADATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_METADATA_PATH));

        let port: u16 = std::env::var("SWITCHYARD_PORT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SWITCHYARD_PORT must be a port number.")?
            .unwrap_or(DEFAULT_PORT);

        let max_connections: usize = std::env::var("SWITCHYARD_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SWITCHYARD_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let log_level = std::env::var("SWITCHYARD_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            metadata_path,
            port,
            max_connections,
            log_level,
        })
    }
}
