//! The accept loop: owns the inbound listening socket, mints client ids,
//! and feeds the dispatcher.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info};

use crate::config::POLL_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::proxy::backend::Client;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::poll;
use crate::proxy::worker::ShutdownFlag;

pub struct Acceptor {
    listener: TcpListener,
    dispatcher: Dispatcher,
    next_client_id: AtomicU64,
    shutdown: Arc<ShutdownFlag>,
}

impl Acceptor {
    /// Bind the listening socket with an explicit backlog.
    pub fn bind(
        addr: SocketAddr,
        backlog: i32,
        dispatcher: Dispatcher,
        shutdown: Arc<ShutdownFlag>,
    ) -> Result<Self> {
        let listener = Self::listen(addr, backlog).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;
        info!(addr = %local_addr, backlog, "listener bound");

        Ok(Self {
            listener,
            dispatcher,
            next_client_id: AtomicU64::new(1),
            shutdown,
        })
    }

    fn listen(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        Ok(socket.into())
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accept until shut down. Accept errors are logged and the loop
    /// continues; the bounded readiness wait keeps the shutdown flag
    /// observed even with no inbound traffic.
    pub fn run(&self) -> io::Result<()> {
        loop {
            if self.shutdown.is_triggered() {
                info!("acceptor stopping");
                return Ok(());
            }

            let mut fds = [poll::readable_entry(self.listener.as_raw_fd())];
            match poll::poll(&mut fds, POLL_TIMEOUT_MS) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "listener poll failed");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
                    self.dispatcher
                        .stats()
                        .accepted
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(client = id, peer = %peer_addr, "client accepted");
                    self.dispatcher.assign(Client::new(id, stream, peer_addr));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    // Brief sleep to avoid a tight loop on persistent errors.
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}
