// ============================================
// File: crates/udtbind-engine/src/loopback.rs
// ============================================
//! # Loopback Engine
//!
//! ## Creation Reason
//! Provides an in-process engine with the native calling convention, so the
//! binding layer can be exercised and demonstrated without the external
//! transport library or any network traffic.
//!
//! ## Main Functionality
//! - Socket table with listeners, backlogs and connected pairs
//! - Stream (byte) and datagram (message) delivery between pairs
//! - Epoll contexts over transport sockets and real system sockets
//! - Per-thread last-error records
//! - Test hooks: call log, forced status, one-shot failure injection
//!
//! ## Main Logical Flow
//! 1. `connect` finds the listener bound at the target address
//! 2. A server-side socket is created and queued on the listener's backlog
//! 3. `accept` pops it; both ends are `Connected`
//! 4. `send` appends to the peer's inbox; `recv` drains the own inbox
//! 5. `close` tombstones the descriptor and breaks the peer
//!
//! ## Usage in Tests
//! ```
//! use std::sync::Arc;
//! use udtbind_engine::{Engine, EngineCall, LoopbackEngine};
//! use udtbind_common::types::{AddressFamily, SocketKind};
//!
//! let engine = Arc::new(LoopbackEngine::new());
//! let sock = engine.socket(AddressFamily::Inet, SocketKind::Stream, 0).unwrap();
//! engine.close(sock).unwrap();
//!
//! assert_eq!(engine.close_count(sock), 1);
//! assert!(engine.calls().contains(&EngineCall::Close(sock)));
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every state change must `notify_all` the condvar; blocked accept, recv
//!   and epoll waits rely on it
//! - System descriptors cannot join the condvar, so waits that include them
//!   re-poll in short slices
//! - Send buffers are unbounded; sends never block
//!
//! ## Last Modified
//! v0.1.0 - Initial loopback engine

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use udtbind_common::time::WaitTimeout;
use udtbind_common::types::{
    AddressFamily, EpollId, EventMask, ReadySets, SocketKind, SocketStatus, SysSocketId,
    UdtSocketId, WaitInterest,
};

use crate::error::{CallFailed, EngineFault, ErrorCode, NativeResult};
use crate::sys;
use crate::traits::Engine;

// ============================================
// Constants
// ============================================

/// First descriptor handed out.
const FIRST_SOCKET_ID: i32 = 1_000;

/// Ephemeral port range used for port-0 binds and implicit binds.
const EPHEMERAL_PORTS: std::ops::RangeInclusive<u16> = 40_000..=65_535;

/// Re-poll interval for waits that include system descriptors.
const SYSTEM_POLL_SLICE: Duration = Duration::from_millis(10);

// ============================================
// Test Hooks
// ============================================

/// Engine operation, used to target failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `startup`
    Startup,
    /// `cleanup`
    Cleanup,
    /// `socket`
    Socket,
    /// `set_blocking`
    SetBlocking,
    /// `bind`
    Bind,
    /// `bind_existing`
    BindExisting,
    /// `listen`
    Listen,
    /// `connect`
    Connect,
    /// `accept`
    Accept,
    /// `send`
    Send,
    /// `recv`
    Recv,
    /// `close`
    Close,
    /// `epoll_create`
    EpollCreate,
    /// `epoll_add_usock` / `epoll_add_ssock`
    EpollAdd,
    /// `epoll_remove_usock` / `epoll_remove_ssock`
    EpollRemove,
    /// `epoll_wait`
    EpollWait,
    /// `epoll_release`
    EpollRelease,
}

/// One recorded engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum EngineCall {
    Startup,
    Cleanup,
    Socket,
    SetBlocking(UdtSocketId),
    Bind(UdtSocketId),
    BindExisting(UdtSocketId, SysSocketId),
    Listen(UdtSocketId),
    Connect(UdtSocketId),
    Accept(UdtSocketId),
    Send(UdtSocketId),
    Recv(UdtSocketId),
    Close(UdtSocketId),
    EpollCreate,
    EpollAddUsock(EpollId, UdtSocketId),
    EpollRemoveUsock(EpollId, UdtSocketId),
    EpollAddSsock(EpollId, SysSocketId),
    EpollRemoveSsock(EpollId, SysSocketId),
    EpollWait(EpollId),
    EpollRelease(EpollId),
}

// ============================================
// Internal State
// ============================================

/// Pending data of one socket.
#[derive(Debug)]
enum Inbox {
    Stream(VecDeque<u8>),
    Datagram(VecDeque<Vec<u8>>),
}

impl Inbox {
    fn for_kind(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Stream => Self::Stream(VecDeque::new()),
            SocketKind::Datagram => Self::Datagram(VecDeque::new()),
        }
    }

    fn has_data(&self) -> bool {
        match self {
            Self::Stream(bytes) => !bytes.is_empty(),
            Self::Datagram(msgs) => !msgs.is_empty(),
        }
    }

    fn push(&mut self, data: &[u8]) {
        match self {
            Self::Stream(bytes) => bytes.extend(data.iter().copied()),
            Self::Datagram(msgs) => msgs.push_back(data.to_vec()),
        }
    }

    /// Moves data into `buf`; datagrams longer than `buf` are truncated.
    fn take(&mut self, buf: &mut [u8]) -> usize {
        match self {
            Self::Stream(bytes) => {
                let n = buf.len().min(bytes.len());
                for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
                    *slot = byte;
                }
                n
            }
            Self::Datagram(msgs) => match msgs.pop_front() {
                Some(msg) => {
                    let n = buf.len().min(msg.len());
                    buf[..n].copy_from_slice(&msg[..n]);
                    n
                }
                None => 0,
            },
        }
    }
}

#[derive(Debug)]
struct Sock {
    family: AddressFamily,
    kind: SocketKind,
    status: SocketStatus,
    send_blocking: bool,
    recv_blocking: bool,
    local: Option<SocketAddr>,
    /// Peer descriptor and the peer's address.
    peer: Option<(UdtSocketId, SocketAddr)>,
    backlog: usize,
    pending: VecDeque<UdtSocketId>,
    inbox: Inbox,
}

impl Sock {
    fn new(family: AddressFamily, kind: SocketKind) -> Self {
        Self {
            family,
            kind,
            status: SocketStatus::Init,
            send_blocking: true,
            recv_blocking: true,
            local: None,
            peer: None,
            backlog: 0,
            pending: VecDeque::new(),
            inbox: Inbox::for_kind(kind),
        }
    }
}

#[derive(Debug, Default)]
struct Poll {
    usocks: BTreeMap<UdtSocketId, EventMask>,
    ssocks: BTreeMap<SysSocketId, EventMask>,
}

impl Poll {
    fn is_empty(&self) -> bool {
        self.usocks.is_empty() && self.ssocks.is_empty()
    }
}

#[derive(Debug)]
struct State {
    started: bool,
    next_id: i32,
    next_eid: i32,
    next_port: u16,
    sockets: HashMap<UdtSocketId, Sock>,
    tombstones: HashSet<UdtSocketId>,
    bound: HashMap<SocketAddr, UdtSocketId>,
    epolls: HashMap<EpollId, Poll>,
}

impl State {
    fn new() -> Self {
        Self {
            started: false,
            next_id: FIRST_SOCKET_ID,
            next_eid: 1,
            next_port: *EPHEMERAL_PORTS.start(),
            sockets: HashMap::new(),
            tombstones: HashSet::new(),
            bound: HashMap::new(),
            epolls: HashMap::new(),
        }
    }

    fn alloc_id(&mut self) -> UdtSocketId {
        let id = UdtSocketId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn status_of(&self, id: UdtSocketId) -> SocketStatus {
        match self.sockets.get(&id) {
            Some(sock) => sock.status,
            None if self.tombstones.contains(&id) => SocketStatus::Closed,
            None => SocketStatus::NonExistent,
        }
    }

    fn port_taken(&self, addr: SocketAddr) -> bool {
        self.bound.keys().any(|taken| {
            taken.port() == addr.port()
                && taken.is_ipv4() == addr.is_ipv4()
                && (taken.ip() == addr.ip()
                    || taken.ip().is_unspecified()
                    || addr.ip().is_unspecified())
        })
    }

    fn ephemeral_port(&mut self, ip: IpAddr) -> Option<u16> {
        let span = usize::from(EPHEMERAL_PORTS.end() - EPHEMERAL_PORTS.start()) + 1;
        for _ in 0..span {
            let port = self.next_port;
            self.next_port = if port == *EPHEMERAL_PORTS.end() {
                *EPHEMERAL_PORTS.start()
            } else {
                port + 1
            };
            if !self.port_taken(SocketAddr::new(ip, port)) {
                return Some(port);
            }
        }
        None
    }

    fn find_listener(&self, addr: SocketAddr) -> Option<UdtSocketId> {
        let wildcard = SocketAddr::new(AddressFamily::of(&addr).unspecified(), addr.port());
        self.bound
            .get(&addr)
            .or_else(|| self.bound.get(&wildcard))
            .copied()
            .filter(|id| self.status_of(*id) == SocketStatus::Listening)
    }

    fn break_peer(&mut self, id: UdtSocketId) {
        if let Some(peer) = self.sockets.get_mut(&id) {
            if matches!(peer.status, SocketStatus::Connected | SocketStatus::Connecting) {
                peer.status = SocketStatus::Broken;
            }
        }
    }

    /// Removes a socket, breaking its peer and any unaccepted connections.
    fn drop_socket(&mut self, id: UdtSocketId) {
        let Some(sock) = self.sockets.remove(&id) else {
            return;
        };
        self.tombstones.insert(id);

        if let Some(local) = sock.local {
            if self.bound.get(&local) == Some(&id) {
                self.bound.remove(&local);
            }
        }
        if let Some((peer, _)) = sock.peer {
            self.break_peer(peer);
        }
        for pending in sock.pending {
            self.drop_socket(pending);
        }
    }

    fn collect_transport(&self, poll: &Poll, interest: WaitInterest, out: &mut ReadySets) {
        for (&id, &mask) in &poll.usocks {
            let status = self.status_of(id);
            let failed = status.is_dead() && mask.contains(EventMask::ERR);

            let (readable, writable) = match self.sockets.get(&id) {
                Some(sock) if sock.status == SocketStatus::Listening => {
                    (mask.contains(EventMask::IN) && !sock.pending.is_empty(), false)
                }
                Some(sock) if sock.status == SocketStatus::Connected => (
                    mask.contains(EventMask::IN) && sock.inbox.has_data(),
                    mask.contains(EventMask::OUT),
                ),
                Some(sock) => (
                    mask.contains(EventMask::IN) && sock.inbox.has_data(),
                    false,
                ),
                None => (false, false),
            };

            if (readable || failed) && interest.transport_read {
                out.transport_read.insert(id);
            }
            if (writable || failed) && interest.transport_write {
                out.transport_write.insert(id);
            }
        }
    }
}

// ============================================
// LoopbackEngine
// ============================================

/// In-process engine with the native calling convention.
///
/// # Features
/// - No network traffic, no privileges
/// - Blocking calls block on a condvar, not on timers
/// - Records every call for verification
pub struct LoopbackEngine {
    /// Sockets, listeners and epolls
    state: Mutex<State>,
    /// Signalled on every state change
    changed: Condvar,
    /// Last error per calling thread
    errors: Mutex<HashMap<ThreadId, EngineFault>>,
    /// Every call made, in order
    log: Mutex<Vec<EngineCall>>,
    /// One-shot failures to return
    injected: Mutex<HashMap<Op, ErrorCode>>,
}

impl LoopbackEngine {
    /// Creates an engine with no sockets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            changed: Condvar::new(),
            errors: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            injected: Mutex::new(HashMap::new()),
        }
    }

    // ========================================
    // Test Hooks
    // ========================================

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.log.lock().clone()
    }

    /// Number of `close` calls issued for `sock`.
    #[must_use]
    pub fn close_count(&self, sock: UdtSocketId) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|call| **call == EngineCall::Close(sock))
            .count()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.log.lock().clear();
    }

    /// Overrides the native status of a live socket.
    pub fn force_status(&self, sock: UdtSocketId, status: SocketStatus) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sockets.get_mut(&sock) {
            entry.status = status;
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Makes the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: Op, code: ErrorCode) {
        self.injected.lock().insert(op, code);
    }

    /// Number of live sockets (tombstones excluded).
    #[must_use]
    pub fn open_sockets(&self) -> usize {
        self.state.lock().sockets.len()
    }

    /// Number of live epoll contexts.
    #[must_use]
    pub fn open_epolls(&self) -> usize {
        self.state.lock().epolls.len()
    }

    /// Returns `true` between `startup` and `cleanup`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    // ========================================
    // Internals
    // ========================================

    fn record(&self, call: EngineCall) {
        trace!(?call, "loopback call");
        self.log.lock().push(call);
    }

    fn set_error(&self, fault: EngineFault) {
        self.errors.lock().insert(thread::current().id(), fault);
    }

    fn fail<T>(&self, code: ErrorCode) -> NativeResult<T> {
        self.set_error(EngineFault::from_code(code));
        Err(CallFailed)
    }

    fn fail_with<T>(&self, code: ErrorCode, detail: impl std::fmt::Display) -> NativeResult<T> {
        self.set_error(EngineFault::with_detail(code, detail));
        Err(CallFailed)
    }

    fn check_injected(&self, op: Op) -> NativeResult<()> {
        let injected = self.injected.lock().remove(&op);
        match injected {
            Some(code) => self.fail(code),
            None => Ok(()),
        }
    }

    fn lock_socket(
        &self,
        sock: UdtSocketId,
    ) -> NativeResult<MutexGuard<'_, State>> {
        let state = self.state.lock();
        if state.sockets.contains_key(&sock) {
            Ok(state)
        } else {
            drop(state);
            self.fail(ErrorCode::InvalidSock)
        }
    }

    fn bind_locked(
        &self,
        state: &mut State,
        sock: UdtSocketId,
        addr: SocketAddr,
    ) -> NativeResult<()> {
        let Some(entry) = state.sockets.get(&sock) else {
            return self.fail(ErrorCode::InvalidSock);
        };
        if entry.status != SocketStatus::Init {
            return self.fail(ErrorCode::InvalidOp);
        }
        if AddressFamily::of(&addr) != entry.family {
            return self.fail_with(ErrorCode::InvalidParam, "address family mismatch");
        }

        let addr = if addr.port() == 0 {
            match state.ephemeral_port(addr.ip()) {
                Some(port) => SocketAddr::new(addr.ip(), port),
                None => return self.fail_with(ErrorCode::SockFail, "no ephemeral port left"),
            }
        } else if state.port_taken(addr) {
            return self.fail_with(ErrorCode::SockFail, format!("{addr} already in use"));
        } else {
            addr
        };

        state.bound.insert(addr, sock);
        if let Some(entry) = state.sockets.get_mut(&sock) {
            entry.local = Some(addr);
            entry.status = SocketStatus::Opened;
        }
        debug!(sock = %sock, addr = %addr, "loopback bind");
        Ok(())
    }

    fn collect_system(
        &self,
        system: &[(SysSocketId, EventMask)],
        interest: WaitInterest,
        out: &mut ReadySets,
    ) -> NativeResult<()> {
        let fds: Vec<SysSocketId> = system.iter().map(|(fd, _)| *fd).collect();
        let ready = match sys::poll_ready(&fds) {
            Ok(ready) => ready,
            Err(e) => return self.fail_with(ErrorCode::Resource, e),
        };

        for ((fd, mask), readiness) in system.iter().zip(ready) {
            if interest.system_read && readiness.readable && mask.contains(EventMask::IN) {
                out.system_read.insert(*fd);
            }
            if interest.system_write && readiness.writable && mask.contains(EventMask::OUT) {
                out.system_write.insert(*fd);
            }
        }
        Ok(())
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackEngine")
            .field("started", &state.started)
            .field("sockets", &state.sockets.len())
            .field("epolls", &state.epolls.len())
            .finish()
    }
}

// ============================================
// Engine Implementation
// ============================================

impl Engine for LoopbackEngine {
    fn startup(&self) -> NativeResult<()> {
        self.record(EngineCall::Startup);
        self.check_injected(Op::Startup)?;
        self.state.lock().started = true;
        Ok(())
    }

    fn cleanup(&self) -> NativeResult<()> {
        self.record(EngineCall::Cleanup);
        self.check_injected(Op::Cleanup)?;

        let mut state = self.state.lock();
        let sockets = state.sockets.len();
        let epolls = state.epolls.len();
        state.sockets.clear();
        state.tombstones.clear();
        state.bound.clear();
        state.epolls.clear();
        state.started = false;
        drop(state);

        self.changed.notify_all();
        debug!(sockets, epolls, "loopback cleanup");
        Ok(())
    }

    fn socket(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: i32,
    ) -> NativeResult<UdtSocketId> {
        self.record(EngineCall::Socket);
        self.check_injected(Op::Socket)?;
        if protocol < 0 {
            return self.fail(ErrorCode::InvalidParam);
        }

        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.sockets.insert(id, Sock::new(family, kind));
        Ok(id)
    }

    fn set_blocking(&self, sock: UdtSocketId, send: bool, recv: bool) -> NativeResult<()> {
        self.record(EngineCall::SetBlocking(sock));
        self.check_injected(Op::SetBlocking)?;

        let mut state = self.lock_socket(sock)?;
        if let Some(entry) = state.sockets.get_mut(&sock) {
            entry.send_blocking = send;
            entry.recv_blocking = recv;
        }
        Ok(())
    }

    fn bind(&self, sock: UdtSocketId, addr: SocketAddr) -> NativeResult<()> {
        self.record(EngineCall::Bind(sock));
        self.check_injected(Op::Bind)?;

        let mut state = self.state.lock();
        self.bind_locked(&mut state, sock, addr)
    }

    fn bind_existing(&self, sock: UdtSocketId, sys: SysSocketId) -> NativeResult<()> {
        self.record(EngineCall::BindExisting(sock, sys));
        self.check_injected(Op::BindExisting)?;

        let addr = match sys::local_addr(sys) {
            Ok(addr) => addr,
            Err(e) => return self.fail_with(ErrorCode::SockFail, e),
        };
        let mut state = self.state.lock();
        self.bind_locked(&mut state, sock, addr)
    }

    fn listen(&self, sock: UdtSocketId, backlog: i32) -> NativeResult<()> {
        self.record(EngineCall::Listen(sock));
        self.check_injected(Op::Listen)?;

        let Ok(backlog) = usize::try_from(backlog) else {
            return self.fail(ErrorCode::InvalidParam);
        };

        let mut state = self.lock_socket(sock)?;
        let Some(entry) = state.sockets.get_mut(&sock) else {
            drop(state);
            return self.fail(ErrorCode::InvalidSock);
        };
        let code = match entry.status {
            SocketStatus::Opened | SocketStatus::Listening => {
                entry.status = SocketStatus::Listening;
                entry.backlog = backlog;
                None
            }
            SocketStatus::Init => Some(ErrorCode::UnboundSock),
            SocketStatus::Connected | SocketStatus::Connecting => Some(ErrorCode::ConnSock),
            _ => Some(ErrorCode::InvalidOp),
        };
        drop(state);

        match code {
            Some(code) => self.fail(code),
            None => {
                debug!(sock = %sock, backlog, "loopback listen");
                Ok(())
            }
        }
    }

    fn connect(&self, sock: UdtSocketId, addr: SocketAddr) -> NativeResult<()> {
        self.record(EngineCall::Connect(sock));
        self.check_injected(Op::Connect)?;

        let mut state = self.lock_socket(sock)?;
        let (status, family) = match state.sockets.get(&sock) {
            Some(entry) => (entry.status, entry.family),
            None => return Err(CallFailed),
        };
        match status {
            SocketStatus::Init | SocketStatus::Opened => {}
            SocketStatus::Connected | SocketStatus::Connecting => {
                drop(state);
                return self.fail(ErrorCode::ConnSock);
            }
            _ => {
                drop(state);
                return self.fail(ErrorCode::InvalidOp);
            }
        }
        if AddressFamily::of(&addr) != family {
            drop(state);
            return self.fail_with(ErrorCode::InvalidParam, "address family mismatch");
        }

        // Implicit bind, like the native engine does on connect.
        if status == SocketStatus::Init {
            let any = SocketAddr::new(family.unspecified(), 0);
            self.bind_locked(&mut state, sock, any)?;
        }

        let Some(listener) = state.find_listener(addr) else {
            drop(state);
            return self.fail_with(ErrorCode::NoServer, addr);
        };
        let (listener_kind, listener_local, backlog, queued) = match state.sockets.get(&listener)
        {
            Some(l) => (l.kind, l.local.unwrap_or(addr), l.backlog, l.pending.len()),
            None => return Err(CallFailed),
        };
        let client_kind = state.sockets.get(&sock).map_or(listener_kind, |s| s.kind);
        if client_kind != listener_kind {
            drop(state);
            return self.fail_with(ErrorCode::ConnRejected, "socket kind mismatch");
        }
        if queued >= backlog {
            drop(state);
            return self.fail_with(ErrorCode::ConnRejected, "backlog full");
        }

        let client_local = state
            .sockets
            .get(&sock)
            .and_then(|s| s.local)
            .map_or(addr, |local| {
                if local.ip().is_unspecified() {
                    let loopback = match family {
                        AddressFamily::Inet => IpAddr::V4(Ipv4Addr::LOCALHOST),
                        AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    };
                    SocketAddr::new(loopback, local.port())
                } else {
                    local
                }
            });

        let server_side = state.alloc_id();
        let mut accepted = Sock::new(family, listener_kind);
        accepted.status = SocketStatus::Connected;
        accepted.local = Some(listener_local);
        accepted.peer = Some((sock, client_local));
        state.sockets.insert(server_side, accepted);

        if let Some(l) = state.sockets.get_mut(&listener) {
            l.pending.push_back(server_side);
        }
        if let Some(client) = state.sockets.get_mut(&sock) {
            client.status = SocketStatus::Connected;
            client.peer = Some((server_side, listener_local));
        }
        drop(state);

        self.changed.notify_all();
        debug!(sock = %sock, peer = %addr, server_side = %server_side, "loopback connect");
        Ok(())
    }

    fn accept(&self, sock: UdtSocketId) -> NativeResult<(UdtSocketId, SocketAddr)> {
        self.record(EngineCall::Accept(sock));
        self.check_injected(Op::Accept)?;

        let mut state = self.state.lock();
        loop {
            let Some(entry) = state.sockets.get_mut(&sock) else {
                drop(state);
                return self.fail(ErrorCode::InvalidSock);
            };
            if entry.status != SocketStatus::Listening {
                drop(state);
                return self.fail(ErrorCode::NoListen);
            }
            if let Some(accepted) = entry.pending.pop_front() {
                let peer = state
                    .sockets
                    .get(&accepted)
                    .and_then(|s| s.peer)
                    .map(|(_, addr)| addr);
                drop(state);
                return match peer {
                    Some(peer) => Ok((accepted, peer)),
                    None => self.fail(ErrorCode::ConnLost),
                };
            }
            if !entry.recv_blocking {
                drop(state);
                return self.fail(ErrorCode::AsyncRecv);
            }
            self.changed.wait(&mut state);
        }
    }

    fn send(&self, sock: UdtSocketId, buf: &[u8]) -> NativeResult<usize> {
        self.record(EngineCall::Send(sock));
        self.check_injected(Op::Send)?;

        let mut state = self.lock_socket(sock)?;
        let (status, peer) = match state.sockets.get(&sock) {
            Some(entry) => (entry.status, entry.peer),
            None => return Err(CallFailed),
        };
        match status {
            SocketStatus::Connected => {}
            SocketStatus::Broken => {
                drop(state);
                return self.fail(ErrorCode::ConnLost);
            }
            _ => {
                drop(state);
                return self.fail(ErrorCode::NoConn);
            }
        }

        let mut delivered = false;
        if let Some((peer, _)) = peer {
            if let Some(entry) = state.sockets.get_mut(&peer) {
                if !entry.status.is_dead() {
                    entry.inbox.push(buf);
                    delivered = true;
                }
            }
        }
        if !delivered {
            if let Some(entry) = state.sockets.get_mut(&sock) {
                entry.status = SocketStatus::Broken;
            }
            drop(state);
            self.changed.notify_all();
            return self.fail(ErrorCode::ConnLost);
        }
        drop(state);

        self.changed.notify_all();
        Ok(buf.len())
    }

    fn recv(&self, sock: UdtSocketId, buf: &mut [u8]) -> NativeResult<usize> {
        self.record(EngineCall::Recv(sock));
        self.check_injected(Op::Recv)?;

        let mut state = self.state.lock();
        loop {
            let Some(entry) = state.sockets.get_mut(&sock) else {
                drop(state);
                return self.fail(ErrorCode::InvalidSock);
            };
            if entry.inbox.has_data() {
                let n = entry.inbox.take(buf);
                return Ok(n);
            }
            let code = match entry.status {
                SocketStatus::Connected if !entry.recv_blocking => Some(ErrorCode::AsyncRecv),
                SocketStatus::Connected => None,
                SocketStatus::Broken => Some(ErrorCode::ConnLost),
                _ => Some(ErrorCode::NoConn),
            };
            if let Some(code) = code {
                drop(state);
                return self.fail(code);
            }
            self.changed.wait(&mut state);
        }
    }

    fn close(&self, sock: UdtSocketId) -> NativeResult<()> {
        self.record(EngineCall::Close(sock));
        self.check_injected(Op::Close)?;

        let mut state = self.lock_socket(sock)?;
        state.drop_socket(sock);
        drop(state);

        self.changed.notify_all();
        debug!(sock = %sock, "loopback close");
        Ok(())
    }

    fn status(&self, sock: UdtSocketId) -> SocketStatus {
        self.state.lock().status_of(sock)
    }

    fn epoll_create(&self) -> NativeResult<EpollId> {
        self.record(EngineCall::EpollCreate);
        self.check_injected(Op::EpollCreate)?;

        let mut state = self.state.lock();
        let eid = EpollId::new(state.next_eid);
        state.next_eid += 1;
        state.epolls.insert(eid, Poll::default());
        Ok(eid)
    }

    fn epoll_add_usock(
        &self,
        eid: EpollId,
        sock: UdtSocketId,
        events: Option<EventMask>,
    ) -> NativeResult<()> {
        self.record(EngineCall::EpollAddUsock(eid, sock));
        self.check_injected(Op::EpollAdd)?;

        let mut state = self.state.lock();
        if !state.sockets.contains_key(&sock) {
            drop(state);
            return self.fail(ErrorCode::InvalidSock);
        }
        let Some(poll) = state.epolls.get_mut(&eid) else {
            drop(state);
            return self.fail(ErrorCode::InvalidPollId);
        };
        poll.usocks.insert(sock, events.unwrap_or(EventMask::ALL));
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    fn epoll_remove_usock(&self, eid: EpollId, sock: UdtSocketId) -> NativeResult<()> {
        self.record(EngineCall::EpollRemoveUsock(eid, sock));
        self.check_injected(Op::EpollRemove)?;

        let mut state = self.state.lock();
        let removed = state.epolls.get_mut(&eid).map(|poll| poll.usocks.remove(&sock));
        drop(state);

        match removed {
            None => self.fail(ErrorCode::InvalidPollId),
            Some(None) => self.fail_with(ErrorCode::InvalidParam, format!("{sock} not registered")),
            Some(Some(_)) => Ok(()),
        }
    }

    fn epoll_add_ssock(
        &self,
        eid: EpollId,
        sys: SysSocketId,
        events: Option<EventMask>,
    ) -> NativeResult<()> {
        self.record(EngineCall::EpollAddSsock(eid, sys));
        self.check_injected(Op::EpollAdd)?;

        if sys.raw() < 0 {
            return self.fail(ErrorCode::InvalidParam);
        }
        let mut state = self.state.lock();
        let Some(poll) = state.epolls.get_mut(&eid) else {
            drop(state);
            return self.fail(ErrorCode::InvalidPollId);
        };
        poll.ssocks.insert(sys, events.unwrap_or(EventMask::ALL));
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    fn epoll_remove_ssock(&self, eid: EpollId, sys: SysSocketId) -> NativeResult<()> {
        self.record(EngineCall::EpollRemoveSsock(eid, sys));
        self.check_injected(Op::EpollRemove)?;

        let mut state = self.state.lock();
        let removed = state.epolls.get_mut(&eid).map(|poll| poll.ssocks.remove(&sys));
        drop(state);

        match removed {
            None => self.fail(ErrorCode::InvalidPollId),
            Some(None) => self.fail_with(ErrorCode::InvalidParam, format!("{sys} not registered")),
            Some(Some(_)) => Ok(()),
        }
    }

    fn epoll_wait(
        &self,
        eid: EpollId,
        interest: WaitInterest,
        timeout: WaitTimeout,
        out: &mut ReadySets,
    ) -> NativeResult<usize> {
        self.record(EngineCall::EpollWait(eid));
        out.clear();
        self.check_injected(Op::EpollWait)?;

        if !interest.any() {
            return self.fail_with(ErrorCode::InvalidParam, "no readiness set requested");
        }

        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        loop {
            let Some(poll) = state.epolls.get(&eid) else {
                drop(state);
                return self.fail(ErrorCode::InvalidPollId);
            };
            if poll.is_empty() && timeout.is_infinite() {
                drop(state);
                return self.fail_with(ErrorCode::InvalidParam, "nothing to wait for");
            }

            state.collect_transport(poll, interest, out);
            let system: Vec<(SysSocketId, EventMask)> = if interest.wants_system() {
                poll.ssocks.iter().map(|(fd, mask)| (*fd, *mask)).collect()
            } else {
                Vec::new()
            };
            if let Err(e) = self.collect_system(&system, interest, out) {
                out.clear();
                return Err(e);
            }

            let total = out.total();
            if total > 0 {
                return Ok(total);
            }

            let remaining = deadline.remaining();
            if matches!(remaining, Some(d) if d.is_zero()) {
                drop(state);
                return self.fail(ErrorCode::Timeout);
            }

            let slice = match (remaining, system.is_empty()) {
                (None, true) => None,
                (None, false) => Some(SYSTEM_POLL_SLICE),
                (Some(d), true) => Some(d),
                (Some(d), false) => Some(d.min(SYSTEM_POLL_SLICE)),
            };
            match slice {
                Some(d) => {
                    self.changed.wait_for(&mut state, d);
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    fn epoll_release(&self, eid: EpollId) -> NativeResult<()> {
        self.record(EngineCall::EpollRelease(eid));
        self.check_injected(Op::EpollRelease)?;

        let mut state = self.state.lock();
        let removed = state.epolls.remove(&eid).is_some();
        drop(state);

        if !removed {
            return self.fail(ErrorCode::InvalidPollId);
        }
        self.changed.notify_all();
        Ok(())
    }

    fn last_error(&self) -> EngineFault {
        self.errors
            .lock()
            .get(&thread::current().id())
            .cloned()
            .unwrap_or_default()
    }

    fn clear_error(&self) {
        self.errors.lock().remove(&thread::current().id());
    }
}

// ============================================
// Tests
// ============================================
