//! The backend roster: a fixed-capacity registry and its bootstrap.
//!
//! Slots are dense-packed from the metadata file, dialled once, and nulled
//! on failure. After bootstrap returns the roster is immutable, nulled
//! slots are never reused, and the dispatcher iterates a stable array.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::config::MAX_BACKENDS;
use crate::error::{Error, Result};
use crate::metadata::BackendSpec;
use crate::proxy::backend::{Backend, BackendStatus};
use crate::proxy::worker::{self, Forwarder, ShutdownFlag};

pub struct Roster {
    slots: [Option<Arc<Backend>>; MAX_BACKENDS],
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<ShutdownFlag>,
}

impl std::fmt::Debug for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roster").finish_non_exhaustive()
    }
}

impl Roster {
    /// Build the roster from parsed metadata, dial every backend, and spawn
    /// a worker per successful dial.
    ///
    /// Dials run in transient threads that all complete before this
    /// returns. A failed dial (or worker spawn) nulls the slot. Fails with
    /// [`Error::AllDialsFailed`] when no backend survives, so the caller
    /// never opens the listening socket.
    pub fn bootstrap(
        specs: &[BackendSpec],
        max_connections: usize,
        forwarder: Arc<dyn Forwarder>,
        shutdown: Arc<ShutdownFlag>,
    ) -> Result<Self> {
        let mut slots: [Option<Arc<Backend>>; MAX_BACKENDS] = std::array::from_fn(|_| None);
        for (slot, spec) in slots.iter_mut().zip(specs.iter().take(MAX_BACKENDS)) {
            *slot = Some(Arc::new(Backend::new(spec, max_connections)));
        }

        thread::scope(|scope| {
            for backend in slots.iter().flatten() {
                scope.spawn(move || {
                    let target = backend.target();
                    match TcpStream::connect(target) {
                        Ok(stream) => {
                            info!(backend = %backend.name(), target = %target, "backend connected");
                            backend.mark_active(stream);
                        }
                        Err(e) => {
                            warn!(
                                backend = %backend.name(),
                                target = %target,
                                error = %e,
                                "backend dial failed"
                            );
                            backend.mark_error();
                        }
                    }
                });
            }
        });

        let mut workers = Vec::new();
        for slot in slots.iter_mut() {
            let Some(backend) = slot.clone() else { continue };
            if backend.status() != BackendStatus::Active {
                warn!(backend = %backend.name(), "removing backend from roster");
                *slot = None;
                continue;
            }

            let spawned = thread::Builder::new()
                .name(format!("backend-{}", backend.name()))
                .spawn({
                    let backend = Arc::clone(&backend);
                    let forwarder = Arc::clone(&forwarder);
                    let shutdown = Arc::clone(&shutdown);
                    move || worker::run(backend, forwarder, shutdown)
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(backend = %backend.name(), error = %e, "worker spawn failed");
                    backend.mark_error();
                    *slot = None;
                }
            }
        }

        if workers.is_empty() {
            return Err(Error::AllDialsFailed);
        }
        info!(connected = workers.len(), "roster ready");

        Ok(Self {
            slots,
            workers: Mutex::new(workers),
            shutdown,
        })
    }

    /// Populated slots, in roster order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.slots.iter().flatten()
    }

    /// The backend at `index`, if the slot is populated.
    pub fn get(&self, index: usize) -> Option<&Arc<Backend>> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// Number of connected backends.
    pub fn connected(&self) -> usize {
        self.iter().count()
    }

    /// Trigger the shutdown flag, wake every worker, and join them.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        for backend in self.iter() {
            backend.interrupt();
        }
        let handles: Vec<_> = self
            .workers
            .lock()
            .expect("worker handle lock poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    #[cfg(test)]
    pub(crate) fn with_backends(backends: Vec<Arc<Backend>>) -> Self {
        let mut slots: [Option<Arc<Backend>>; MAX_BACKENDS] = std::array::from_fn(|_| None);
        for (slot, backend) in slots.iter_mut().zip(backends) {
            *slot = Some(backend);
        }
        Self {
            slots,
            workers: Mutex::new(Vec::new()),
            shutdown: Arc::new(ShutdownFlag::new()),
        }
    }
}

impl Drop for Roster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
