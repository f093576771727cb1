// ============================================
// File: crates/udtbind-cli/src/demo.rs
// ============================================
//! # Echo Demo
//!
//! ## Creation Reason
//! Drives every part of the binding in one run: a listener and its
//! accepted connections in a multiplexer, alongside a plain UDP socket,
//! with dead connections swept by garbage collection.
//!
//! ## Main Logical Flow
//! 1. Start the process-wide runtime over the loopback engine
//! 2. Client threads connect and send framed messages
//! 3. The server loop waits on the multiplexer and echoes each frame
//! 4. A heartbeat thread feeds the UDP socket registered next to them
//! 5. Closed connections are dropped and swept; then everything shuts down
//!
//! ## Frame Layout
//! ```text
//! ┌──────────────┬──────────────────┬─────────────┐
//! │ version (u32)│ length (u64)     │ payload     │
//! │ big endian   │ big endian       │ length B    │
//! └──────────────┴──────────────────┴─────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial echo demo

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use udtbind::{BindingConfig, EventMask, EventMultiplexer, Runtime, SocketHandle};
use udtbind_common::types::{SysSocketId, UdtSocketId, WaitInterest};
use udtbind_engine::LoopbackEngine;

const FRAME_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;
const WAIT_SLICE_MS: i64 = 100;
const HEARTBEAT_EVERY: Duration = Duration::from_millis(20);

/// Parameters of one demo run.
#[derive(Debug, Clone)]
pub struct EchoOptions {
    /// Listener port
    pub port: u16,
    /// Number of client threads
    pub clients: usize,
    /// Messages per client
    pub messages: usize,
    /// Payload size in bytes
    pub size: usize,
}

/// What a run did.
#[derive(Debug, Default)]
pub struct EchoReport {
    /// Connections accepted
    pub accepted: usize,
    /// Frames echoed
    pub echoed: usize,
    /// Associations removed by garbage collection
    pub collected: usize,
    /// Heartbeat datagrams seen on the system socket
    pub heartbeats: usize,
}

// ============================================
// Framing
// ============================================

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_VERSION.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn send_all(sock: &SocketHandle, mut data: &[u8]) -> anyhow::Result<()> {
    while !data.is_empty() {
        let sent = sock.send(data)?;
        if sent == 0 {
            bail!("{} accepted no bytes", sock.descriptor());
        }
        data = &data[sent..];
    }
    Ok(())
}

fn recv_exact(sock: &SocketHandle, len: usize) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = sock.recv(len - out.len())?;
        if chunk.is_empty() {
            bail!("{} returned no data", sock.descriptor());
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Payload length announced by a frame header.
fn parse_header(header: &[u8]) -> anyhow::Result<usize> {
    if header.len() < HEADER_LEN {
        bail!("short frame header ({} bytes)", header.len());
    }
    let version = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if version != FRAME_VERSION {
        bail!("unsupported frame version {version}");
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[4..HEADER_LEN]);
    usize::try_from(u64::from_be_bytes(len_bytes)).context("frame too large")
}

fn read_frame(sock: &SocketHandle) -> anyhow::Result<Vec<u8>> {
    let header = recv_exact(sock, HEADER_LEN)?;
    let len = parse_header(&header)?;
    recv_exact(sock, len)
}

/// Payload of a frame carried whole in one datagram.
fn decode_datagram(datagram: &[u8]) -> anyhow::Result<&[u8]> {
    let len = parse_header(datagram)?;
    let body = &datagram[HEADER_LEN..];
    if body.len() != len {
        bail!("datagram carries {} of {len} payload bytes", body.len());
    }
    Ok(body)
}

// ============================================
// Client
// ============================================

fn spawn_client(
    runtime: &Arc<Runtime>,
    index: usize,
    options: &EchoOptions,
) -> JoinHandle<anyhow::Result<usize>> {
    let runtime = Arc::clone(runtime);
    let options = options.clone();

    thread::spawn(move || {
        let sock = SocketHandle::new(&runtime)?;
        sock.connect("127.0.0.1", options.port)?;
        debug!(client = index, sock = %sock.descriptor(), "Client connected");

        for round in 0..options.messages {
            #[allow(clippy::cast_possible_truncation)]
            let payload: Vec<u8> = (0..options.size)
                .map(|i| (i + index + round) as u8)
                .collect();
            send_all(&sock, &encode_frame(&payload))?;

            let echoed = read_frame(&sock)?;
            if echoed != payload {
                bail!("client {index}: echo mismatch in round {round}");
            }
        }

        sock.close()?;
        Ok(options.messages)
    })
}

// ============================================
// Heartbeat
// ============================================

fn spawn_heartbeat(
    target: std::net::SocketAddr,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<()>> {
    let sender = UdpSocket::bind("127.0.0.1:0").context("heartbeat socket")?;
    Ok(thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            if let Err(e) = sender.send_to(&encode_frame(b"beat"), target) {
                warn!(error = %e, "Heartbeat send failed");
                return;
            }
            thread::sleep(HEARTBEAT_EVERY);
        }
    }))
}

// ============================================
// Server
// ============================================

/// Runs the echo demo and tears the runtime down afterwards.
///
/// # Errors
/// Fails if any client sees a mismatch or any binding call fails.
pub fn run(options: &EchoOptions, config: BindingConfig) -> anyhow::Result<EchoReport> {
    let runtime = udtbind::startup_with(Arc::new(LoopbackEngine::new()), config)?;
    let result = serve(&runtime, options);
    udtbind::cleanup()?;
    result
}

fn serve(runtime: &Arc<Runtime>, options: &EchoOptions) -> anyhow::Result<EchoReport> {
    let mut report = EchoReport::default();

    let listener = Arc::new(SocketHandle::new(runtime)?);
    listener.bind("127.0.0.1", options.port)?;
    listener.listen_default()?;
    info!(listener = %listener, "Echo server listening");

    let poller = EventMultiplexer::create(runtime)?;
    poller.add_transport(&listener, Some(EventMask::IN))?;

    let beats = UdpSocket::bind("127.0.0.1:0").context("heartbeat receiver")?;
    beats.set_nonblocking(true)?;
    let beats_id = system_id(&beats)?;
    poller.add_system(beats_id, Some(EventMask::IN))?;

    let stop = Arc::new(AtomicBool::new(false));
    let heartbeat = spawn_heartbeat(beats.local_addr()?, Arc::clone(&stop))?;

    let clients: Vec<_> = (0..options.clients)
        .map(|i| spawn_client(runtime, i, options))
        .collect();

    let mut conns: HashMap<UdtSocketId, Arc<SocketHandle>> = HashMap::new();
    let interest = WaitInterest::default().system_read(true);

    loop {
        // A client cannot finish before its connection was served.
        if conns.is_empty() && clients.iter().all(JoinHandle::is_finished) {
            break;
        }

        if poller.wait_with(WAIT_SLICE_MS, interest)? == 0 {
            continue;
        }

        for sock in poller.ready_transport_read() {
            if sock == listener.descriptor() {
                let (conn, peer) = listener.accept()?;
                let conn = Arc::new(conn);
                poller.add_transport(&conn, Some(EventMask::IN | EventMask::ERR))?;
                info!(conn = %conn.descriptor(), peer = %peer, "Client accepted");
                conns.insert(conn.descriptor(), conn);
                report.accepted += 1;
                continue;
            }

            let Some(conn) = poller.handle_for(sock) else {
                continue;
            };
            match read_frame(&conn) {
                Ok(payload) => {
                    send_all(&conn, &encode_frame(&payload))?;
                    report.echoed += 1;
                }
                Err(e) => {
                    debug!(conn = %sock, error = %e, "Connection finished");
                    drop(conn);
                    conns.remove(&sock);
                    report.collected += poller.garbage_collect()?;
                }
            }
        }

        for sys in poller.ready_system_read() {
            if sys == beats_id {
                report.heartbeats += drain_heartbeats(&beats);
            }
        }
    }

    stop.store(true, Ordering::Release);
    if heartbeat.join().is_err() {
        warn!("Heartbeat thread panicked");
    }

    let mut failures = 0;
    for client in clients {
        match client.join() {
            Ok(Ok(rounds)) => debug!(rounds, "Client finished"),
            Ok(Err(e)) => {
                warn!(error = %e, "Client failed");
                failures += 1;
            }
            Err(_) => failures += 1,
        }
    }

    poller.remove_system(beats_id)?;
    poller.release()?;
    listener.close()?;

    if failures > 0 {
        bail!("{failures} client(s) failed");
    }
    Ok(report)
}

fn drain_heartbeats(sock: &UdpSocket) -> usize {
    let mut buf = [0u8; 64];
    let mut seen = 0;
    while let Ok((n, from)) = sock.recv_from(&mut buf) {
        match decode_datagram(&buf[..n]) {
            Ok(_) => seen += 1,
            Err(e) => warn!(from = %from, error = %e, "Dropping malformed heartbeat"),
        }
    }
    seen
}

#[cfg(unix)]
#[allow(clippy::unnecessary_wraps)]
fn system_id(sock: &UdpSocket) -> anyhow::Result<SysSocketId> {
    Ok(SysSocketId::from(sock))
}

#[cfg(not(unix))]
fn system_id(_sock: &UdpSocket) -> anyhow::Result<SysSocketId> {
    bail!("system sockets in the multiplexer need a unix platform")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(b"abc");
        assert_eq!(&frame[..4], &[0, 0, 0, 1]);
        assert_eq!(&frame[4..12], &3u64.to_be_bytes());
        assert_eq!(&frame[12..], b"abc");
        assert_eq!(decode_datagram(&frame).unwrap(), b"abc");
    }

    #[test]
    fn test_malformed_frames() {
        assert!(parse_header(&[0, 0, 0, 1]).is_err());

        let mut frame = encode_frame(b"abc");
        frame[3] = 2;
        assert!(parse_header(&frame).is_err());

        let truncated = &encode_frame(b"abcdef")[..14];
        assert!(decode_datagram(truncated).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_echo_run() {
        let mut config = BindingConfig::default();
        config.signals.install_handlers = false;
        let options = EchoOptions {
            port: 9900,
            clients: 3,
            messages: 4,
            size: 100,
        };

        let report = run(&options, config).unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(report.echoed, 12);
        assert!(report.collected >= 3);
    }
}
