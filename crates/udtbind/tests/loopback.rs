// ============================================
// File: crates/udtbind/tests/loopback.rs
// ============================================
//! End-to-end behaviour of handles and multiplexers over the loopback
//! engine.

use std::net::UdpSocket;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use udtbind::runtime::{self, InterpreterLock};
use udtbind::{
    BindingConfig, Endpoint, ErrorKind, EventMask, EventMultiplexer, Runtime, SocketHandle,
    SocketStatus, SysSocketId, WaitInterest,
};
use udtbind_engine::error::ErrorCode;
use udtbind_engine::{Engine, LoopbackEngine};

fn started() -> (Arc<LoopbackEngine>, Arc<Runtime>) {
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = Runtime::new(engine.clone());
    runtime.startup().unwrap();
    (engine, runtime)
}

fn connected(runtime: &Arc<Runtime>, port: u16) -> (Arc<SocketHandle>, Arc<SocketHandle>) {
    let server = SocketHandle::new(runtime).unwrap();
    server.bind("127.0.0.1", port).unwrap();
    server.listen(8).unwrap();

    let client = SocketHandle::new(runtime).unwrap();
    client.connect("127.0.0.1", port).unwrap();
    let (accepted, _) = server.accept().unwrap();
    (Arc::new(client), Arc::new(accepted))
}

#[test]
fn test_peer_address_of_accepted_connection() {
    let (_, runtime) = started();

    let server = SocketHandle::new(&runtime).unwrap();
    server.bind("127.0.0.1", 9001).unwrap();
    server.listen(1).unwrap();

    let client = SocketHandle::new(&runtime).unwrap();
    client.bind("127.0.0.1", 9002).unwrap();
    client.connect("127.0.0.1", 9001).unwrap();

    let (accepted, peer) = server.accept().unwrap();
    assert_eq!(peer, Endpoint::new("127.0.0.1", 9002));
    assert_eq!(peer.to_string(), "127.0.0.1:9002");
    assert!(accepted.is_alive());
}

#[test]
fn test_close_twice_single_native_close() {
    let (engine, runtime) = started();
    let (client, _server) = connected(&runtime, 9010);
    let raw = client.descriptor();

    client.close().unwrap();
    client.close().unwrap();
    drop(client);

    assert_eq!(engine.close_count(raw), 1);
}

#[test]
fn test_borrowed_descriptor_outlives_handle() {
    let (engine, runtime) = started();
    let (client, _server) = connected(&runtime, 9020);
    let raw = client.descriptor();

    let view = SocketHandle::wrap(&runtime, raw, false).unwrap();
    drop(view);
    assert_eq!(engine.close_count(raw), 0);

    client.send(b"still open").unwrap();
}

#[test]
fn test_poll_returns_immediately() {
    let (_, runtime) = started();
    let poller = EventMultiplexer::create(&runtime).unwrap();

    let begin = Instant::now();
    assert_eq!(poller.wait(0).unwrap(), 0);
    assert!(begin.elapsed() < Duration::from_millis(200));
}

#[test]
fn test_bounded_wait_times_out_with_zero() {
    let (_, runtime) = started();
    let (_client, server) = connected(&runtime, 9030);
    let poller = EventMultiplexer::create(&runtime).unwrap();
    poller.add_transport(&server, Some(EventMask::IN)).unwrap();

    let begin = Instant::now();
    assert_eq!(poller.wait(50).unwrap(), 0);
    assert!(begin.elapsed() >= Duration::from_millis(40));
    assert!(poller.ready_transport_read().is_empty());
}

#[test]
fn test_infinite_wait_wakes_on_peer_write() {
    let (_, runtime) = started();
    let (client, server) = connected(&runtime, 9040);
    let poller = EventMultiplexer::create(&runtime).unwrap();
    poller.add_transport(&server, Some(EventMask::IN)).unwrap();

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        client.send(b"wake up").unwrap();
        client
    });

    let ready = poller.wait(-1).unwrap();
    assert!(ready >= 1);
    assert!(poller.ready_transport_read().contains(&server.descriptor()));
    assert_eq!(server.recv(64).unwrap(), b"wake up");

    drop(writer.join().unwrap());
}

#[test]
fn test_garbage_collect_forced_closed() {
    let (engine, runtime) = started();
    let (client, _server) = connected(&runtime, 9050);
    let poller = EventMultiplexer::create(&runtime).unwrap();
    poller.add_transport(&client, None).unwrap();
    let raw = client.descriptor();

    engine.force_status(raw, SocketStatus::Closed);
    assert_eq!(poller.garbage_collect().unwrap(), 1);
    assert!(!poller.tracked().contains(&raw));

    // Not registered any more: nothing to report.
    assert_eq!(poller.wait(0).unwrap(), 0);
    assert!(!poller.ready_transport_write().contains(&raw));

    drop(client);
    assert_eq!(engine.close_count(raw), 1);
}

#[test]
fn test_round_trip_and_short_read() {
    let (_, runtime) = started();
    let (client, server) = connected(&runtime, 9060);

    assert_eq!(client.send(b"0123456789").unwrap(), 10);
    assert_eq!(server.recv(4).unwrap(), b"0123");
    assert_eq!(server.recv(100).unwrap(), b"456789");
}

#[test]
fn test_send_after_peer_close() {
    let (_, runtime) = started();
    let (client, server) = connected(&runtime, 9070);

    server.close().unwrap();
    let err = client.send(b"late").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.message().starts_with("[UDT error 2001]"));
}

#[test]
fn test_failure_leaves_no_stale_error() {
    let (engine, runtime) = started();
    let sock = SocketHandle::new(&runtime).unwrap();

    let err = sock.connect("127.0.0.1", 9).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert!(engine.last_error().is_none());

    let again = udtbind::translate_engine_error(&*engine, ErrorKind::Engine);
    assert_eq!(again.code(), 0);
}

#[cfg(unix)]
#[test]
fn test_mixed_transport_and_system_readiness() {
    let (_, runtime) = started();
    let (client, server) = connected(&runtime, 9080);
    let poller = EventMultiplexer::create(&runtime).unwrap();
    poller.add_transport(&server, Some(EventMask::IN)).unwrap();

    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sys = SysSocketId::from(&udp);
    poller.add_system(sys, Some(EventMask::OUT)).unwrap();

    client.send(b"x").unwrap();
    let interest = WaitInterest::all();
    assert_eq!(poller.wait_with(1000, interest).unwrap(), 2);
    assert!(poller.ready_transport_read().contains(&server.descriptor()));
    assert!(poller.ready_system_write().contains(&sys));
    assert!(poller.ready_system_read().is_empty());
}

#[test]
fn test_blocking_recv_releases_execution_lock() {
    let engine = Arc::new(LoopbackEngine::new());
    let lock = Arc::new(InterpreterLock::new());
    let runtime = Runtime::with_lock(engine, BindingConfig::default(), lock.clone());
    let (client, server) = connected(&runtime, 9090);

    let _held = lock.enter();
    let (tx, rx) = mpsc::channel();
    let other_lock = Arc::clone(&lock);
    let writer = thread::spawn(move || {
        // Only possible while the main thread is parked inside recv.
        let _entered = other_lock.enter();
        tx.send(()).unwrap();
        client.send(b"ok").unwrap();
    });

    assert_eq!(server.recv(8).unwrap(), b"ok");
    assert!(lock.is_held());
    rx.recv_timeout(Duration::from_secs(1)).unwrap();
    writer.join().unwrap();
}

#[test]
fn test_failed_blocking_calls_restore_execution_lock() {
    let engine = Arc::new(LoopbackEngine::new());
    let lock = Arc::new(InterpreterLock::new());
    let runtime = Runtime::with_lock(engine, BindingConfig::default(), lock.clone());
    let (client, server) = connected(&runtime, 9095);
    let poller = EventMultiplexer::create(&runtime).unwrap();

    let _held = lock.enter();
    client.close().unwrap();

    let err = server.recv(8).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.native_code(), Some(ErrorCode::ConnLost));
    assert!(lock.is_held());

    let err = poller.wait(-1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Wait);
    assert_eq!(err.native_code(), Some(ErrorCode::InvalidParam));
    assert!(lock.is_held());
}

#[test]
fn test_process_wide_startup_is_idempotent() {
    let mut config = BindingConfig::default();
    config.signals.install_handlers = false;

    let engine = Arc::new(LoopbackEngine::new());
    let first = runtime::startup_with(engine.clone(), config.clone()).unwrap();
    let second = runtime::startup_with(Arc::new(LoopbackEngine::new()), config).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(engine.is_started());

    udtbind::cleanup().unwrap();
    assert!(!engine.is_started());
    assert!(runtime::global().is_none());
    udtbind::cleanup().unwrap();
}
