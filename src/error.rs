//! Error types for the balancer.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Balancer errors, grouped the way they are handled: configuration errors
/// retry interactively, bootstrap errors null roster slots, and only the
/// variants below ever abort the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Metadata file could not be opened (drives the interactive retry).
    #[error("could not open server metadata {path}: {source}")]
    MetadataOpen { path: PathBuf, source: io::Error },

    /// Standard input closed while prompting for a metadata path.
    #[error("metadata prompt aborted: standard input closed")]
    MetadataAborted,

    /// Every backend dial (or worker spawn) failed during bootstrap.
    #[error("All server connection attempts failed.")]
    AllDialsFailed,

    /// Listening socket could not be created, bound, or put into listen.
    #[error("failed to listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
