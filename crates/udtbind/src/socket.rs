// ============================================
// File: crates/udtbind/src/socket.rs
// ============================================
//! # Socket Handle
//!
//! ## Creation Reason
//! Owns exactly one native transport descriptor and exposes the
//! connection-oriented operations on it, with blocking calls run outside
//! the host's execution lock and every failure translated on the spot.
//!
//! ## Main Functionality
//! - `SocketHandle::create()` / `new()`: Fresh descriptor from the engine
//! - `SocketHandle::wrap()`: Adopt an existing descriptor
//! - bind / listen / connect / accept / send / recv / close
//! - Ownership flag deciding whether release closes the descriptor
//!
//! ## Handle Lifecycle
//! ```text
//! ┌──────┐  bind / connect   ┌───────┐  close / drop   ┌────────┐
//! │ Open │ ────────────────► │ Alive │ ──────────────► │ Closed │
//! └──────┘                   └───────┘                 └────────┘
//!     │          close / drop (no native call)              ▲
//!     └─────────────────────────────────────────────────────┘
//! wrap() and accept() start in Alive.
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `close()` is the only place that swallows "invalid socket"
//! - Handles built by `wrap()` report AF_INET / SOCK_STREAM; the engine
//!   cannot be asked, and accepted handles copy the listener's values
//! - A handle with `close_on_release = false` never closes its descriptor
//! - Dropping a handle does not remove it from a multiplexer; remove first
//!
//! ## Last Modified
//! v0.1.0 - Initial socket handle

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use udtbind_common::types::{AddressFamily, Endpoint, SocketKind, SysSocketId, UdtSocketId};
use udtbind_engine::error::ErrorCode;

use crate::bridge::{fault_error, take_fault, translate_engine_error};
use crate::error::{ErrorKind, Result, UdtError};
use crate::runtime::Runtime;

// ============================================
// HandleState
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    /// Descriptor allocated, not yet bound or connected.
    Open,
    /// Descriptor bound, connected or accepted.
    Alive,
    /// `close()` has run.
    Closed,
}

// ============================================
// SocketHandle
// ============================================

/// Owning wrapper around one native transport socket.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use udtbind::{Runtime, SocketHandle};
/// use udtbind_engine::LoopbackEngine;
///
/// let runtime = Runtime::new(Arc::new(LoopbackEngine::new()));
/// let server = SocketHandle::new(&runtime).unwrap();
/// server.bind("127.0.0.1", 0).unwrap();
/// server.listen(8).unwrap();
/// assert!(server.is_alive());
/// ```
pub struct SocketHandle {
    runtime: Arc<Runtime>,
    descriptor: UdtSocketId,
    family: AddressFamily,
    kind: SocketKind,
    protocol: i32,
    close_on_release: AtomicBool,
    state: Mutex<HandleState>,
}

impl SocketHandle {
    // ========================================
    // Construction
    // ========================================

    /// Allocates a new native socket.
    ///
    /// Default blocking modes from the runtime configuration are applied.
    ///
    /// # Errors
    /// Returns an `Engine` error if the engine cannot allocate or configure
    /// the socket.
    pub fn create(
        runtime: &Arc<Runtime>,
        family: AddressFamily,
        kind: SocketKind,
        protocol: i32,
    ) -> Result<Self> {
        let engine = runtime.engine();
        let Ok(descriptor) = engine.socket(family, kind, protocol) else {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        };

        let handle = Self::from_parts(
            runtime,
            descriptor,
            family,
            kind,
            protocol,
            true,
            HandleState::Open,
        );
        if let Err(e) = handle.apply_default_options() {
            // Never bound, so release would not close it.
            if engine.close(descriptor).is_err() {
                engine.clear_error();
            }
            handle.mark_closed();
            return Err(e);
        }

        trace!(sock = %descriptor, family = %family, kind = %kind, "Socket created");
        Ok(handle)
    }

    /// Allocates an `AF_INET` stream socket, protocol 0.
    ///
    /// # Errors
    /// See [`SocketHandle::create`].
    pub fn new(runtime: &Arc<Runtime>) -> Result<Self> {
        Self::create(runtime, AddressFamily::Inet, SocketKind::Stream, 0)
    }

    /// Adopts an existing, already connected descriptor.
    ///
    /// The handle is alive immediately. With `close_on_release = false` the
    /// descriptor stays owned by whoever supplied it.
    ///
    /// # Errors
    /// Returns an `Engine` error if default options cannot be applied.
    pub fn wrap(
        runtime: &Arc<Runtime>,
        descriptor: UdtSocketId,
        close_on_release: bool,
    ) -> Result<Self> {
        Self::adopt(
            runtime,
            descriptor,
            AddressFamily::Inet,
            SocketKind::Stream,
            0,
            close_on_release,
        )
    }

    fn adopt(
        runtime: &Arc<Runtime>,
        descriptor: UdtSocketId,
        family: AddressFamily,
        kind: SocketKind,
        protocol: i32,
        close_on_release: bool,
    ) -> Result<Self> {
        let handle = Self::from_parts(
            runtime,
            descriptor,
            family,
            kind,
            protocol,
            close_on_release,
            HandleState::Alive,
        );
        // On failure the handle drops here and closes only what it owns.
        handle.apply_default_options()?;
        Ok(handle)
    }

    fn from_parts(
        runtime: &Arc<Runtime>,
        descriptor: UdtSocketId,
        family: AddressFamily,
        kind: SocketKind,
        protocol: i32,
        close_on_release: bool,
        state: HandleState,
    ) -> Self {
        Self {
            runtime: Arc::clone(runtime),
            descriptor,
            family,
            kind,
            protocol,
            close_on_release: AtomicBool::new(close_on_release),
            state: Mutex::new(state),
        }
    }

    fn apply_default_options(&self) -> Result<()> {
        let options = &self.runtime.config().socket;
        let engine = self.runtime.engine();
        if engine
            .set_blocking(self.descriptor, options.send_blocking, options.recv_blocking)
            .is_err()
        {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        }
        Ok(())
    }

    // ========================================
    // Accessors
    // ========================================

    /// Native descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> UdtSocketId {
        self.descriptor
    }

    /// Address family.
    #[must_use]
    pub const fn address_family(&self) -> AddressFamily {
        self.family
    }

    /// Socket kind.
    #[must_use]
    pub const fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Protocol number.
    #[must_use]
    pub const fn protocol(&self) -> i32 {
        self.protocol
    }

    /// Whether releasing the handle closes the descriptor.
    #[must_use]
    pub fn close_on_release(&self) -> bool {
        self.close_on_release.load(Ordering::Acquire)
    }

    /// Changes whether releasing the handle closes the descriptor.
    pub fn set_close_on_release(&self, close: bool) {
        self.close_on_release.store(close, Ordering::Release);
    }

    /// Returns `true` while the descriptor is bound, connected or accepted
    /// and not closed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.state.lock() == HandleState::Alive
    }

    /// Returns `true` once `close()` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.state.lock() == HandleState::Closed
    }

    /// The runtime this handle belongs to.
    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    // ========================================
    // Connection Setup
    // ========================================

    /// Binds to `host:port`; an empty host binds the wildcard address.
    ///
    /// # Errors
    /// `Argument` if the host does not resolve, `Bind` on native failure.
    pub fn bind(&self, host: &str, port: u16) -> Result<()> {
        self.bind_to(Endpoint::new(host, port))
    }

    /// Binds to an endpoint.
    ///
    /// # Errors
    /// `Argument` if the host does not resolve, `Bind` on native failure.
    pub fn bind_to(&self, endpoint: impl Into<Endpoint>) -> Result<()> {
        self.ensure_open("bind")?;
        let addr = endpoint.into().resolve(self.family)?;

        if self.runtime.engine().bind(self.descriptor, addr).is_err() {
            return Err(self.native_failure(ErrorKind::Bind));
        }
        self.mark_alive();
        trace!(sock = %self.descriptor, addr = %addr, "Socket bound");
        Ok(())
    }

    /// Binds over an existing system UDP socket.
    ///
    /// # Errors
    /// `Bind` on native failure.
    pub fn bind_to_existing(&self, sys: SysSocketId) -> Result<()> {
        self.ensure_open("bind")?;
        if self.runtime.engine().bind_existing(self.descriptor, sys).is_err() {
            return Err(self.native_failure(ErrorKind::Bind));
        }
        self.mark_alive();
        trace!(sock = %self.descriptor, sys = %sys, "Socket bound to system socket");
        Ok(())
    }

    /// Starts listening with the given backlog.
    ///
    /// # Errors
    /// `Listen` on native failure, including a negative backlog.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.ensure_open("listen")?;
        if self.runtime.engine().listen(self.descriptor, backlog).is_err() {
            return Err(self.native_failure(ErrorKind::Listen));
        }
        trace!(sock = %self.descriptor, backlog, "Socket listening");
        Ok(())
    }

    /// Starts listening with the configured default backlog.
    ///
    /// # Errors
    /// `Listen` on native failure.
    pub fn listen_default(&self) -> Result<()> {
        self.listen(self.runtime.config().socket.default_backlog)
    }

    /// Connects to `host:port`.
    ///
    /// # Errors
    /// `Argument` if the host does not resolve, `Connect` on native failure.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.connect_to(Endpoint::new(host, port))
    }

    /// Connects to an endpoint.
    ///
    /// # Errors
    /// `Argument` if the host does not resolve, `Connect` on native failure.
    pub fn connect_to(&self, endpoint: impl Into<Endpoint>) -> Result<()> {
        self.ensure_open("connect")?;
        let addr = endpoint.into().resolve(self.family)?;

        if self.runtime.engine().connect(self.descriptor, addr).is_err() {
            return Err(self.native_failure(ErrorKind::Connect));
        }
        self.mark_alive();
        debug!(sock = %self.descriptor, peer = %addr, "Socket connected");
        Ok(())
    }

    /// Waits for a pending connection.
    ///
    /// The execution lock is released while waiting. The new handle copies
    /// this handle's family, kind and protocol, owns its descriptor, and
    /// comes with the peer's numeric host and port.
    ///
    /// # Errors
    /// `Accept` on native failure; no handle is produced.
    pub fn accept(&self) -> Result<(Self, Endpoint)> {
        self.ensure_open("accept")?;
        let descriptor = self.descriptor;

        let accepted = self.runtime.allow_threads(|engine| engine.accept(descriptor));
        let Ok((sock, peer)) = accepted else {
            return Err(self.native_failure(ErrorKind::Accept));
        };

        let handle = Self::adopt(
            &self.runtime,
            sock,
            self.family,
            self.kind,
            self.protocol,
            true,
        )
        .map_err(|e| e.with_kind(ErrorKind::Accept))?;
        debug!(listener = %descriptor, sock = %sock, peer = %peer, "Connection accepted");
        Ok((handle, Endpoint::from(peer)))
    }

    // ========================================
    // Data Transfer
    // ========================================

    /// Sends bytes; returns how many the engine took.
    ///
    /// # Errors
    /// `Io` on native failure.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open("send")?;
        let descriptor = self.descriptor;

        let sent = self.runtime.allow_threads(|engine| engine.send(descriptor, data));
        match sent {
            Ok(n) => Ok(n),
            Err(_) => Err(self.native_failure(ErrorKind::Io)),
        }
    }

    /// Receives up to `max_len` bytes.
    ///
    /// A short result means the engine delivered fewer bytes; there is no
    /// retry loop.
    ///
    /// # Errors
    /// `Io` on native failure.
    pub fn recv(&self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.recv_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Receives into `buf`, which is zero-filled first.
    ///
    /// # Errors
    /// `Io` on native failure.
    pub fn recv_into(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open("recv")?;
        buf.fill(0);
        let descriptor = self.descriptor;

        let received = self
            .runtime
            .allow_threads(|engine| engine.recv(descriptor, buf));
        match received {
            Ok(n) => Ok(n),
            Err(_) => Err(self.native_failure(ErrorKind::Io)),
        }
    }

    // ========================================
    // Close
    // ========================================

    /// Closes the descriptor; once closed, later calls do nothing.
    ///
    /// Only an alive handle issues the native close. "Invalid socket" from
    /// the engine is not reported.
    ///
    /// # Errors
    /// `Engine` on any other native failure. The handle stays alive then, so
    /// a later `close()` or the drop retries.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, HandleState::Closed);
        if previous != HandleState::Alive {
            return Ok(());
        }

        let engine = self.runtime.engine();
        if engine.close(self.descriptor).is_ok() {
            trace!(sock = %self.descriptor, "Socket closed");
            return Ok(());
        }

        let fault = take_fault(engine);
        if fault.code == ErrorCode::InvalidSock {
            debug!(sock = %self.descriptor, "Socket already invalid at close");
            return Ok(());
        }
        *state = HandleState::Alive;
        Err(fault_error(&fault, ErrorKind::Engine))
    }

    // ========================================
    // Internals
    // ========================================

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_closed() {
            return Err(UdtError::closed_handle(operation));
        }
        Ok(())
    }

    fn mark_alive(&self) {
        let mut state = self.state.lock();
        if *state == HandleState::Open {
            *state = HandleState::Alive;
        }
    }

    fn mark_closed(&self) {
        *self.state.lock() = HandleState::Closed;
    }

    /// Translates the last error; a vanished descriptor becomes
    /// `ClosedHandle` whatever the operation.
    fn native_failure(&self, kind: ErrorKind) -> UdtError {
        let err = translate_engine_error(self.runtime.engine(), kind);
        if err.native_code() == Some(ErrorCode::InvalidSock) {
            err.with_kind(ErrorKind::ClosedHandle)
        } else {
            err
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if !self.close_on_release() {
            return;
        }
        if let Err(e) = self.close() {
            warn!(sock = %self.descriptor, error = %e, "Close on release failed");
        }
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Socket {} ({}, {}, protocol {}, {})",
            self.descriptor,
            self.family,
            self.kind,
            self.protocol,
            if self.is_alive() { "alive" } else { "not alive" },
        )
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("descriptor", &self.descriptor)
            .field("family", &self.family)
            .field("kind", &self.kind)
            .field("protocol", &self.protocol)
            .field("close_on_release", &self.close_on_release())
            .field("state", &*self.state.lock())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use udtbind_common::types::SocketStatus;
    use udtbind_engine::{Engine, EngineCall, LoopbackEngine, Op};

    fn setup() -> (Arc<LoopbackEngine>, Arc<Runtime>) {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = Runtime::new(engine.clone());
        runtime.startup().unwrap();
        (engine, runtime)
    }

    fn listener(runtime: &Arc<Runtime>, port: u16) -> SocketHandle {
        let server = SocketHandle::new(runtime).unwrap();
        server.bind("127.0.0.1", port).unwrap();
        server.listen(4).unwrap();
        server
    }

    #[test]
    fn test_new_defaults() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();

        assert_eq!(sock.address_family(), AddressFamily::Inet);
        assert_eq!(sock.kind(), SocketKind::Stream);
        assert_eq!(sock.protocol(), 0);
        assert!(sock.close_on_release());
        assert!(!sock.is_alive());
        assert!(engine
            .calls()
            .contains(&EngineCall::SetBlocking(sock.descriptor())));
    }

    #[test]
    fn test_create_failure() {
        let (engine, runtime) = setup();
        engine.fail_next(Op::Socket, ErrorCode::Resource);

        let err = SocketHandle::new(&runtime).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(err.code(), 3000);
        assert!(engine.last_error().is_none());
    }

    #[test]
    fn test_create_closes_on_option_failure() {
        let (engine, runtime) = setup();
        engine.fail_next(Op::SetBlocking, ErrorCode::InvalidParam);

        let err = SocketHandle::new(&runtime).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(engine.open_sockets(), 0);
    }

    #[test]
    fn test_bind_sets_alive() {
        let (_, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        assert!(sock.is_alive());
        assert!(sock.to_string().contains("alive"));
    }

    #[test]
    fn test_bind_errors() {
        let (_, runtime) = setup();
        let first = SocketHandle::new(&runtime).unwrap();
        first.bind("127.0.0.1", 7100).unwrap();

        let second = SocketHandle::new(&runtime).unwrap();
        let err = second.bind("127.0.0.1", 7100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bind);
        assert_eq!(err.code(), ErrorCode::SockFail.code());
        assert!(!second.is_alive());

        let err = second.bind("::1", 7101).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn test_listen_negative_backlog() {
        let (_, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        let err = sock.listen(-1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Listen);
        assert_eq!(err.code(), ErrorCode::InvalidParam.code());
    }

    #[test]
    fn test_connect_refused() {
        let (_, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        let err = sock.connect("127.0.0.1", 9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(err.native_code(), Some(ErrorCode::NoServer));
    }

    #[test]
    fn test_accept_inherits_and_reports_peer() {
        let (_, runtime) = setup();
        let server = SocketHandle::create(&runtime, AddressFamily::Inet, SocketKind::Datagram, 0)
            .unwrap();
        server.bind("127.0.0.1", 7110).unwrap();
        server.listen(1).unwrap();

        let client = SocketHandle::create(&runtime, AddressFamily::Inet, SocketKind::Datagram, 0)
            .unwrap();
        client.bind("127.0.0.1", 7111).unwrap();
        client.connect_to(("127.0.0.1", 7110)).unwrap();

        let (accepted, peer) = server.accept().unwrap();
        assert_eq!(peer, Endpoint::new("127.0.0.1", 7111));
        assert_eq!(accepted.kind(), SocketKind::Datagram);
        assert!(accepted.is_alive());
        assert!(accepted.close_on_release());
    }

    #[test]
    fn test_accept_on_non_listener() {
        let (_, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        let err = sock.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Accept);
        assert_eq!(err.native_code(), Some(ErrorCode::NoListen));
    }

    #[test]
    fn test_accept_option_failure_is_accept_error() {
        let (engine, runtime) = setup();
        let server = listener(&runtime, 7130);
        let client = SocketHandle::new(&runtime).unwrap();
        client.connect("127.0.0.1", 7130).unwrap();

        engine.fail_next(Op::SetBlocking, ErrorCode::InvalidParam);
        let err = server.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Accept);
        assert_eq!(err.native_code(), Some(ErrorCode::InvalidParam));
    }

    #[test]
    fn test_send_recv() {
        let (_, runtime) = setup();
        let server = listener(&runtime, 7120);
        let client = SocketHandle::new(&runtime).unwrap();
        client.connect("127.0.0.1", 7120).unwrap();
        let (conn, _) = server.accept().unwrap();

        assert_eq!(client.send(b"hello").unwrap(), 5);
        assert_eq!(conn.recv(5).unwrap(), b"hello");

        client.send(b"abc").unwrap();
        let mut buf = [0xffu8; 8];
        assert_eq!(conn.recv_into(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc\0\0\0\0\0");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();

        sock.close().unwrap();
        sock.close().unwrap();
        assert!(!sock.is_alive());
        assert_eq!(engine.close_count(sock.descriptor()), 1);

        drop(sock);
        let closes = engine
            .calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::Close(_)))
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_close_swallows_invalid_socket() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();

        runtime.cleanup().unwrap();
        sock.close().unwrap();
        assert!(engine.last_error().is_none());
    }

    #[test]
    fn test_close_reports_other_failures() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();

        let raw = sock.descriptor();

        engine.fail_next(Op::Close, ErrorCode::Resource);
        let err = sock.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(sock.is_alive());

        // The retry reaches the engine and the descriptor is released.
        sock.close().unwrap();
        assert!(!sock.is_alive());
        drop(sock);
        assert_eq!(engine.close_count(raw), 2);
        assert_eq!(engine.open_sockets(), 0);
    }

    #[test]
    fn test_failed_close_retried_on_drop() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        let raw = sock.descriptor();

        engine.fail_next(Op::Close, ErrorCode::Resource);
        assert!(sock.close().is_err());
        drop(sock);
        assert_eq!(engine.close_count(raw), 2);
        assert_eq!(engine.open_sockets(), 0);
    }

    #[test]
    fn test_operations_after_close() {
        let (_, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.close().unwrap();

        let err = sock.send(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClosedHandle);
        assert!(!err.is_engine_error());
        assert_eq!(sock.bind("127.0.0.1", 0).unwrap_err().kind(), ErrorKind::ClosedHandle);
    }

    #[test]
    fn test_vanished_descriptor_is_closed_handle() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        engine.close(sock.descriptor()).unwrap();

        let err = sock.listen(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClosedHandle);
        assert!(err.is_engine_error());
    }

    #[test]
    fn test_wrap_without_ownership() {
        let (engine, runtime) = setup();
        let raw = engine
            .socket(AddressFamily::Inet, SocketKind::Stream, 0)
            .unwrap();

        let sock = SocketHandle::wrap(&runtime, raw, false).unwrap();
        assert!(sock.is_alive());
        drop(sock);

        assert_eq!(engine.close_count(raw), 0);
        assert_eq!(engine.status(raw), SocketStatus::Init);
    }

    #[test]
    fn test_wrap_with_ownership() {
        let (engine, runtime) = setup();
        let raw = engine
            .socket(AddressFamily::Inet, SocketKind::Stream, 0)
            .unwrap();

        drop(SocketHandle::wrap(&runtime, raw, true).unwrap());
        assert_eq!(engine.close_count(raw), 1);
        assert_eq!(engine.status(raw), SocketStatus::Closed);
    }

    #[test]
    fn test_release_flag_can_change() {
        let (engine, runtime) = setup();
        let sock = SocketHandle::new(&runtime).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        let raw = sock.descriptor();

        sock.set_close_on_release(false);
        drop(sock);
        assert_eq!(engine.close_count(raw), 0);
    }
}
