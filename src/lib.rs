//! switchyard
//!
//! Least-loaded TCP load balancer.
//!
//! The balancer:
//! - Reads a fixed backend roster from a plain-text metadata file
//! - Dials every backend once at bootstrap and drops the ones that fail
//! - Accepts TCP clients on a well-known port
//! - Assigns each client to the backend with the lowest load ratio
//! - Drains assigned clients in per-backend polling worker threads

pub mod config;
pub mod error;
pub mod metadata;
pub mod proxy;

pub use error::Error;
pub use metadata::BackendSpec;
pub use proxy::{
    Acceptor, AdmissionStats, Backend, BackendStatus, Client, Dispatcher, Forwarder, Roster,
    ShutdownFlag, TraceForwarder,
};
