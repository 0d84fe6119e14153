//! The admission path: pick the least-loaded backend and hand the client
//! over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::proxy::backend::{Backend, Client};
use crate::proxy::roster::Roster;

/// Admission counters, shared between the acceptor and the dispatcher.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    /// Inbound connections accepted.
    pub accepted: AtomicU64,
    /// Clients handed to a backend.
    pub dispatched: AtomicU64,
    /// Clients closed because no backend could take them.
    pub rejected: AtomicU64,
}

pub struct Dispatcher {
    roster: Arc<Roster>,
    stats: Arc<AdmissionStats>,
}

impl Dispatcher {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self {
            roster,
            stats: Arc::new(AdmissionStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<AdmissionStats> {
        &self.stats
    }

    /// Least-load selection: the first backend whose load ratio is strictly
    /// below every earlier candidate's, starting from 1.0, so a backend at
    /// its ceiling is never selected and ties keep the lower roster index.
    fn select(&self) -> Option<&Arc<Backend>> {
        let mut best: Option<&Arc<Backend>> = None;
        let mut best_load = 1.0_f64;
        for backend in self.roster.iter() {
            let load = backend.load();
            if load < best_load {
                best_load = load;
                best = Some(backend);
            }
        }
        best
    }

    /// Admit `client`: select a backend, install the client in its poll
    /// set, and signal its worker. Rejected clients are closed by drop.
    pub fn assign(&self, client: Client) {
        let Some(backend) = self.select() else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(client = client.id, "no backend below capacity, rejecting client");
            return;
        };

        let name = backend.name();
        match backend.admit(client) {
            Ok(()) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    backend = %name,
                    assigned = backend.assigned(),
                    "client dispatched"
                );
            }
            Err(client) => {
                // The backend filled up between the load read and the
                // handover; close the client rather than retrying.
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    backend = %name,
                    client = client.id,
                    "backend at ceiling during handover, rejecting client"
                );
            }
        }
    }
}
