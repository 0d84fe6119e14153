//! Backend records and per-backend client state.
//!
//! Each backend carries three independently locked blocks:
//!
//! - the *identity* block (name, dial target, outbound socket, status),
//!   near-static after bootstrap;
//! - the *capacity* block (assigned count and ceiling) plus the condition
//!   variable its worker sleeps on while the count is zero;
//! - the *poll* block, a pair of parallel vectors (poll descriptors and
//!   client records) where index `i` in both refers to the same client.
//!
//! The only multi-lock sequence anywhere in the engine is capacity then poll,
//! used identically by the dispatcher ([`Backend::admit`]) and the worker
//! ([`Backend::remove_closed`]). Signals on the condition variable are
//! raised only while the capacity lock is held.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::metadata::BackendSpec;
use crate::proxy::poll;
use crate::proxy::worker::ShutdownFlag;

/// A client connection accepted by the balancer.
///
/// Owned by exactly one backend's poll set from dispatch onwards; dropping
/// it closes the socket.
#[derive(Debug)]
pub struct Client {
    /// Process-lifetime unique identifier, minted at accept time.
    pub id: u64,
    /// The connected stream socket.
    pub stream: TcpStream,
    /// Peer address as reported by accept.
    pub peer_addr: SocketAddr,
}

impl Client {
    pub fn new(id: u64, stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            stream,
            peer_addr,
        }
    }
}

/// Operating status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    /// Dialled successfully; its worker is (or is about to start) serving.
    Active,
    /// Constructed but not yet dialled.
    Inactive,
    /// Dial or worker spawn failed; the roster slot is nulled.
    Error,
}

/// Identity block: who the backend is and how to reach it.
pub(crate) struct Identity {
    pub(crate) name: String,
    pub(crate) address: Ipv4Addr,
    pub(crate) port: u16,
    /// Outbound socket, present once the backend has been dialled.
    pub(crate) stream: Option<TcpStream>,
    pub(crate) status: BackendStatus,
}

/// Capacity block: how many clients the backend currently carries.
pub(crate) struct Capacity {
    pub(crate) assigned: usize,
    pub(crate) max_connections: usize,
}

impl Capacity {
    /// Selection key: assigned over ceiling, in [0.0, 1.0].
    pub(crate) fn load(&self) -> f64 {
        self.assigned as f64 / self.max_connections as f64
    }
}

/// The parallel pair of poll descriptors and client records.
///
/// Appends and removals always touch both vectors at the same index, so
/// `fds[i].fd` is the raw fd of `clients[i]` at every point the lock is
/// free. Removal is swap-remove, which keeps the live entries dense.
pub(crate) struct PollSet {
    fds: Vec<libc::pollfd>,
    clients: Vec<Client>,
}

impl PollSet {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            clients: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn append(&mut self, client: Client) {
        self.fds.push(poll::readable_entry(client.stream.as_raw_fd()));
        self.clients.push(client);
    }

    pub(crate) fn swap_remove(&mut self, index: usize) -> Client {
        self.fds.swap_remove(index);
        self.clients.swap_remove(index)
    }

    /// The first `n` descriptors, contiguous for the poll call.
    pub(crate) fn descriptors_mut(&mut self, n: usize) -> &mut [libc::pollfd] {
        debug_assert!(n <= self.fds.len());
        &mut self.fds[..n]
    }

    /// Whether entry `index` reported readable data on the last poll.
    pub(crate) fn readable(&self, index: usize) -> bool {
        self.fds[index].revents & libc::POLLIN != 0
    }

    pub(crate) fn client(&self, index: usize) -> &Client {
        &self.clients[index]
    }

    pub(crate) fn fd_at(&self, index: usize) -> RawFd {
        self.fds[index].fd
    }
}

/// One upstream backend: identity, capacity bookkeeping, and the poll set
/// its worker drains.
pub struct Backend {
    pub(crate) identity: Mutex<Identity>,
    pub(crate) capacity: Mutex<Capacity>,
    /// Wait primitive: the worker sleeps here while `assigned == 0`.
    pub(crate) assigned_cv: Condvar,
    pub(crate) poll_set: Mutex<PollSet>,
    /// Total peers observed closing, for accounting.
    disconnected: AtomicU64,
}

impl Backend {
    pub fn new(spec: &BackendSpec, max_connections: usize) -> Self {
        Self {
            identity: Mutex::new(Identity {
                name: spec.name.clone(),
                address: spec.address,
                port: spec.port,
                stream: None,
                status: BackendStatus::Inactive,
            }),
            capacity: Mutex::new(Capacity {
                assigned: 0,
                max_connections: max_connections.max(1),
            }),
            assigned_cv: Condvar::new(),
            poll_set: Mutex::new(PollSet::with_capacity(max_connections)),
            disconnected: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> String {
        self.identity.lock().expect("identity lock poisoned").name.clone()
    }

    /// The address this backend is dialled on.
    pub fn target(&self) -> SocketAddr {
        let identity = self.identity.lock().expect("identity lock poisoned");
        SocketAddr::V4(SocketAddrV4::new(identity.address, identity.port))
    }

    pub fn status(&self) -> BackendStatus {
        self.identity.lock().expect("identity lock poisoned").status
    }

    /// Record a successful dial: store the outbound socket, go Active.
    pub(crate) fn mark_active(&self, stream: TcpStream) {
        let mut identity = self.identity.lock().expect("identity lock poisoned");
        identity.stream = Some(stream);
        identity.status = BackendStatus::Active;
    }

    /// Record a failed dial or worker spawn.
    pub(crate) fn mark_error(&self) {
        self.identity.lock().expect("identity lock poisoned").status = BackendStatus::Error;
    }

    pub fn assigned(&self) -> usize {
        self.capacity.lock().expect("capacity lock poisoned").assigned
    }

    pub fn max_connections(&self) -> usize {
        self.capacity
            .lock()
            .expect("capacity lock poisoned")
            .max_connections
    }

    /// Current load ratio, read under a brief capacity lock.
    pub fn load(&self) -> f64 {
        self.capacity.lock().expect("capacity lock poisoned").load()
    }

    /// Peers observed closing since bootstrap.
    pub fn disconnected(&self) -> u64 {
        self.disconnected.load(Ordering::Relaxed)
    }

    /// Run `f` with the backend's outbound socket, if dialled. This is the
    /// surface a [`Forwarder`](crate::proxy::Forwarder) uses to reach the
    /// upstream.
    pub fn with_outbound<R>(&self, f: impl FnOnce(Option<&TcpStream>) -> R) -> R {
        let identity = self.identity.lock().expect("identity lock poisoned");
        f(identity.stream.as_ref())
    }

    /// Handover: install `client` as the next poll-set entry, increment the
    /// assigned count, and signal the worker, all under capacity then poll.
    ///
    /// Returns the client back if the backend is at its ceiling, so the
    /// caller can reject it.
    pub fn admit(&self, client: Client) -> Result<(), Client> {
        let mut capacity = self.capacity.lock().expect("capacity lock poisoned");
        if capacity.assigned >= capacity.max_connections {
            return Err(client);
        }

        let mut set = self.poll_set.lock().expect("poll lock poisoned");
        debug_assert_eq!(set.len(), capacity.assigned);
        set.append(client);
        capacity.assigned += 1;
        // Raised while the capacity lock is held; the worker re-checks the
        // predicate after wake.
        self.assigned_cv.notify_one();
        drop(set);
        drop(capacity);
        Ok(())
    }

    /// Block until at least one client is assigned, tolerating spurious
    /// wakeups. Returns the count snapshot, or `None` once shut down.
    pub(crate) fn wait_for_assigned(&self, shutdown: &ShutdownFlag) -> Option<usize> {
        let mut capacity = self.capacity.lock().expect("capacity lock poisoned");
        while capacity.assigned == 0 {
            if shutdown.is_triggered() {
                return None;
            }
            capacity = self
                .assigned_cv
                .wait(capacity)
                .expect("capacity lock poisoned");
        }
        Some(capacity.assigned)
    }

    /// Remove the clients at `indices` (ascending) from the poll set and
    /// re-sync the assigned count. Dropping each record closes its socket.
    ///
    /// Takes capacity before poll, the same order as [`Backend::admit`],
    /// so the worker calls this after releasing its scan-time poll lock.
    /// Appends that slip in between are safe: only the owning worker ever
    /// removes, so the remembered indices stay valid, and swap-remove in
    /// descending order never disturbs a lower index.
    pub(crate) fn remove_closed(&self, indices: &[usize]) {
        let mut capacity = self.capacity.lock().expect("capacity lock poisoned");
        let mut set = self.poll_set.lock().expect("poll lock poisoned");
        for &index in indices.iter().rev() {
            let client = set.swap_remove(index);
            debug!(client = client.id, peer = %client.peer_addr, "peer closed");
        }
        capacity.assigned = set.len();
        drop(set);
        drop(capacity);
        self.disconnected
            .fetch_add(indices.len() as u64, Ordering::Relaxed);
    }

    /// Wake the worker without assigning work (shutdown path).
    pub fn interrupt(&self) {
        let _capacity = self.capacity.lock().expect("capacity lock poisoned");
        self.assigned_cv.notify_all();
    }

    pub(crate) fn lock_poll_set(&self) -> MutexGuard<'_, PollSet> {
        self.poll_set.lock().expect("poll lock poisoned")
    }
}
