//! End-to-end dispatch scenarios: readback, least-load selection, peer
//! close, capacity rejection, and client accounting.


use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use harness::{direct_client, spec, wait_until, EchoBackend, RecordingForwarder};
use switchyard::{Acceptor, Dispatcher, Forwarder, Roster, ShutdownFlag};

struct Balancer {
    roster: Arc<Roster>,
    acceptor: Arc<Acceptor>,
    addr: SocketAddr,
    shutdown: Arc<ShutdownFlag>,
    accept_thread: Option<thread::JoinHandle<std::io::Result<()>>>,
}

impl Balancer {
    /// Bootstrap a roster over `backends` and run an acceptor on an
    /// ephemeral port.
    fn spawn(
        backends: &[switchyard::BackendSpec],
        max_connections: usize,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownFlag::new());
        let roster = Arc::new(
            Roster::bootstrap(backends, max_connections, forwarder, Arc::clone(&shutdown))
                .unwrap(),
        );
        let acceptor = Arc::new(
            Acceptor::bind(
                "127.0.0.1:0".parse().unwrap(),
                100,
                Dispatcher::new(Arc::clone(&roster)),
                Arc::clone(&shutdown),
            )
            .unwrap(),
        );
        let addr = acceptor.local_addr().unwrap();
        let accept_thread = {
            let acceptor = Arc::clone(&acceptor);
            thread::spawn(move || acceptor.run())
        };
        Self {
            roster,
            acceptor,
            addr,
            shutdown,
            accept_thread: Some(accept_thread),
        }
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        self.shutdown.trigger();
        self.roster.shutdown();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn single_backend_readback() {
    let echo = EchoBackend::spawn().unwrap();
    let forwarder = Arc::new(RecordingForwarder::default());
    let balancer = Balancer::spawn(&[spec("SERVER_0", echo.addr)], 1000, forwarder.clone());

    let backend = balancer.roster.get(0).unwrap();
    assert_eq!(backend.assigned(), 0);

    let mut client = TcpStream::connect(balancer.addr).unwrap();
    client.write_all(b"hello\n").unwrap();

    let payloads = forwarder.wait_for(1, Duration::from_secs(5));
    assert_eq!(payloads, vec![b"hello\n".to_vec()]);
    assert_eq!(backend.assigned(), 1);

    let stats = balancer.acceptor.dispatcher().stats();
    assert_eq!(stats.accepted.load(Ordering::Relaxed), 1);
    assert_eq!(stats.dispatched.load(Ordering::Relaxed), 1);
    assert_eq!(stats.rejected.load(Ordering::Relaxed), 0);
}

#[test]
fn dispatch_prefers_the_least_loaded_backend() {
    let echo0 = EchoBackend::spawn().unwrap();
    let echo1 = EchoBackend::spawn().unwrap();
    let forwarder = Arc::new(RecordingForwarder::default());
    let shutdown = Arc::new(ShutdownFlag::new());
    let roster = Arc::new(
        Roster::bootstrap(
            &[spec("SERVER_0", echo0.addr), spec("SERVER_1", echo1.addr)],
            1000,
            forwarder,
            Arc::clone(&shutdown),
        )
        .unwrap(),
    );
    let dispatcher = Dispatcher::new(Arc::clone(&roster));

    let server_0 = roster.get(0).unwrap();
    let server_1 = roster.get(1).unwrap();

    // Pre-state: SERVER_0 carries two clients, SERVER_1 one.
    server_0.admit(direct_client(10, echo0.addr)).unwrap();
    server_0.admit(direct_client(11, echo0.addr)).unwrap();
    server_1.admit(direct_client(12, echo1.addr)).unwrap();
    assert_eq!(server_0.assigned(), 2);
    assert_eq!(server_1.assigned(), 1);

    dispatcher.assign(direct_client(13, echo1.addr));

    assert_eq!(server_1.assigned(), 2);
    assert_eq!(server_0.assigned(), 2);
    assert_eq!(dispatcher.stats().dispatched.load(Ordering::Relaxed), 1);

    roster.shutdown();
}

#[test]
fn peer_close_decrements_and_compacts() {
    let echo = EchoBackend::spawn().unwrap();
    let forwarder = Arc::new(RecordingForwarder::default());
    let balancer = Balancer::spawn(&[spec("SERVER_0", echo.addr)], 1000, forwarder.clone());
    let backend = balancer.roster.get(0).unwrap();

    let mut client = TcpStream::connect(balancer.addr).unwrap();
    client.write_all(b"ping").unwrap();

    let payloads = forwarder.wait_for(1, Duration::from_secs(5));
    assert_eq!(payloads, vec![b"ping".to_vec()]);
    assert_eq!(backend.assigned(), 1);

    drop(client);

    assert!(wait_until(Duration::from_secs(5), || backend.assigned() == 0));
    assert_eq!(backend.disconnected(), 1);
}

#[test]
fn second_client_joins_an_active_poll_set() {
    let echo = EchoBackend::spawn().unwrap();
    let forwarder = Arc::new(RecordingForwarder::default());
    let balancer = Balancer::spawn(&[spec("SERVER_0", echo.addr)], 1000, forwarder.clone());

    let mut first = TcpStream::connect(balancer.addr).unwrap();
    first.write_all(b"one").unwrap();
    forwarder.wait_for(1, Duration::from_secs(5));

    let mut second = TcpStream::connect(balancer.addr).unwrap();
    second.write_all(b"two").unwrap();

    let payloads = forwarder.wait_for(2, Duration::from_secs(5));
    assert_eq!(payloads.len(), 2);
    assert!(payloads.contains(&b"one".to_vec()));
    assert!(payloads.contains(&b"two".to_vec()));
    assert_eq!(balancer.roster.get(0).unwrap().assigned(), 2);
}

#[test]
fn clients_are_rejected_when_every_backend_is_full() {
    let echo = EchoBackend::spawn().unwrap();
    let forwarder = Arc::new(RecordingForwarder::default());
    let balancer = Balancer::spawn(&[spec("SERVER_0", echo.addr)], 1, forwarder);
    let backend = balancer.roster.get(0).unwrap();
    let stats = balancer.acceptor.dispatcher().stats();

    let _held = TcpStream::connect(balancer.addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || backend.assigned() == 1));

    let mut turned_away = TcpStream::connect(balancer.addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        stats.rejected.load(Ordering::Relaxed) == 1
    }));
    assert_eq!(backend.assigned(), 1);

    // The rejected client's socket was closed by the balancer.
    turned_away
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = [0u8; 1];
    assert!(matches!(turned_away.read(&mut buf), Ok(0) | Err(_)));
}

#[test]
fn held_clients_match_accepts_minus_rejections_and_disconnects() {
    let echo0 = EchoBackend::spawn().unwrap();
    let echo1 = EchoBackend::spawn().unwrap();
    let forwarder = Arc::new(RecordingForwarder::default());
    let balancer = Balancer::spawn(
        &[spec("SERVER_0", echo0.addr), spec("SERVER_1", echo1.addr)],
        1000,
        forwarder,
    );
    let stats = balancer.acceptor.dispatcher().stats();

    let _first = TcpStream::connect(balancer.addr).unwrap();
    let second = TcpStream::connect(balancer.addr).unwrap();
    let _third = TcpStream::connect(balancer.addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        stats.dispatched.load(Ordering::Relaxed) == 3
    }));

    drop(second);
    assert!(wait_until(Duration::from_secs(5), || {
        balancer.roster.iter().map(|b| b.disconnected()).sum::<u64>() == 1
    }));

    let held: usize = balancer.roster.iter().map(|b| b.assigned()).sum();
    let accepted = stats.accepted.load(Ordering::Relaxed);
    let rejected = stats.rejected.load(Ordering::Relaxed);
    let disconnected: u64 = balancer.roster.iter().map(|b| b.disconnected()).sum();
    assert_eq!(held as u64, accepted - rejected - disconnected);
}
