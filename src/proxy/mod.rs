//! The concurrency and dispatch engine.
//!
//! This module provides:
//! - the backend record and its per-backend locked state
//! - the fixed-capacity roster and its dial/spawn bootstrap
//! - the per-backend worker poll loop
//! - least-load dispatch
//! - the accept loop
//!
//! ## Architecture
//!
//! ```text
//! Client -> Acceptor -> Dispatcher -> Backend poll set -> Worker -> Forwarder
//!                           |                                |
//!                     least-load scan                 condvar signal
//! ```
//!
//! One native thread per connected backend plus the acceptor thread. Per
//! backend, the only multi-lock order is capacity then poll, shared by the
//! dispatcher and the worker.

mod acceptor;
mod backend;
mod dispatcher;
mod poll;
mod roster;
mod worker;

pub use acceptor::Acceptor;
pub use backend::{Backend, BackendStatus, Client};
pub use dispatcher::{AdmissionStats, Dispatcher};
pub use roster::Roster;
pub use worker::{Forwarder, ShutdownFlag, TraceForwarder};
