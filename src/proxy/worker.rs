//! The per-backend worker loop.
//!
//! One worker thread runs forever for each connected backend. It sleeps on
//! the backend's condition variable until at least one client is assigned,
//! then polls that client set for readability with a bounded timeout and
//! drains each ready socket. It does not accept, does not choose backends,
//! and never touches another backend's state.
//!
//! Reads happen while the poll lock is held, so a slow client read briefly
//! blocks handover to this backend. Disconnect bookkeeping is deferred to
//! the end of the cycle and re-acquires capacity then poll in the
//! dispatcher's order.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::{POLL_TIMEOUT_MS, READ_BUF_LEN};
use crate::proxy::backend::{Backend, Client};
use crate::proxy::poll;

/// Process-wide stop signal, checked at the top of every worker iteration
/// and between acceptor polls.
#[derive(Debug, Default)]
pub struct ShutdownFlag(AtomicBool);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The outbound hook: what to do with a payload read from a client.
///
/// The contract is "forward `payload` to this backend's outbound socket";
/// the stock implementation only traces it, leaving the upstream protocol
/// to the embedder.
pub trait Forwarder: Send + Sync {
    fn forward(&self, backend: &Backend, client: &Client, payload: &[u8]);
}

/// Stock hook: trace the payload and drop it.
pub struct TraceForwarder;

impl Forwarder for TraceForwarder {
    fn forward(&self, backend: &Backend, client: &Client, payload: &[u8]) {
        trace!(
            backend = %backend.name(),
            client = client.id,
            bytes = payload.len(),
            "payload ready for upstream"
        );
    }
}

/// Worker loop body; runs on its own named thread until shutdown.
pub(crate) fn run(backend: Arc<Backend>, forwarder: Arc<dyn Forwarder>, shutdown: Arc<ShutdownFlag>) {
    let name = backend.name();
    debug!(backend = %name, "worker started");

    let mut buf = [0u8; READ_BUF_LEN];
    while !shutdown.is_triggered() {
        // Sleep until the dispatcher hands us at least one client, then
        // snapshot the count; entries appended after the snapshot are
        // picked up next cycle.
        let Some(n) = backend.wait_for_assigned(&shutdown) else {
            break;
        };

        let mut closed: Vec<usize> = Vec::new();
        {
            let mut set = backend.lock_poll_set();
            match poll::poll(set.descriptors_mut(n), POLL_TIMEOUT_MS) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(backend = %name, error = %e, "poll failed");
                    continue;
                }
            }

            for i in 0..n {
                if !set.readable(i) {
                    continue;
                }
                let client = set.client(i);
                match (&client.stream).read(&mut buf) {
                    Ok(0) => closed.push(i),
                    Ok(count) => {
                        trace!(
                            backend = %name,
                            client = client.id,
                            bytes = count,
                            "drained client"
                        );
                        forwarder.forward(backend.as_ref(), client, &buf[..count]);
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        warn!(
                            backend = %name,
                            client = client.id,
                            error = %e,
                            "client read failed"
                        );
                    }
                }
            }
        }

        if !closed.is_empty() {
            backend.remove_closed(&closed);
        }
    }

    debug!(backend = %name, "worker stopped");
}
