// ============================================
// File: crates/udtbind-engine/src/traits.rs
// ============================================
//! # Engine Trait
//!
//! ## Creation Reason
//! Defines the fixed native surface the binding layer consumes, so the
//! binding can run against the external library or against the in-process
//! loopback engine without code changes.
//!
//! ## Main Functionality
//! - `Engine`: Socket, epoll, error and lifecycle calls
//!
//! ## Design Philosophy
//! - Mirrors the native calling convention (failure marker + last error)
//! - Blocking calls really block; the caller decides what to release first
//! - Object safe; used as `Arc<dyn Engine>`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync, blocking calls run on any thread
//! - The last-error record is per calling thread; read it on the same thread
//!   that made the failing call
//! - `status` never fails; unknown descriptors are `NonExistent`
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definition

use std::net::SocketAddr;

use udtbind_common::time::WaitTimeout;
use udtbind_common::types::{
    AddressFamily, EpollId, EventMask, ReadySets, SocketKind, SocketStatus, SysSocketId,
    UdtSocketId, WaitInterest,
};

use crate::error::{EngineFault, NativeResult};

// ============================================
// Engine Trait
// ============================================

/// The native transport engine.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; a blocked `accept`, `recv` or
/// `epoll_wait` on one thread must not prevent calls from other threads.
///
/// # Example
/// ```ignore
/// fn open_listener(engine: &dyn Engine, addr: SocketAddr) -> NativeResult<UdtSocketId> {
///     let sock = engine.socket(AddressFamily::Inet, SocketKind::Stream, 0)?;
///     engine.bind(sock, addr)?;
///     engine.listen(sock, 16)?;
///     Ok(sock)
/// }
/// ```
pub trait Engine: Send + Sync {
    // ========================================
    // Lifecycle
    // ========================================

    /// Initializes the engine.
    ///
    /// # Errors
    /// Fails if the engine cannot start.
    fn startup(&self) -> NativeResult<()>;

    /// Tears the engine down, invalidating every socket and epoll.
    ///
    /// # Errors
    /// Fails if teardown reports an error.
    fn cleanup(&self) -> NativeResult<()>;

    // ========================================
    // Sockets
    // ========================================

    /// Allocates a socket.
    ///
    /// # Errors
    /// Fails on unsupported parameters or resource exhaustion.
    fn socket(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: i32,
    ) -> NativeResult<UdtSocketId>;

    /// Sets blocking mode for sends and receives.
    ///
    /// # Errors
    /// Fails on an invalid socket.
    fn set_blocking(&self, sock: UdtSocketId, send: bool, recv: bool) -> NativeResult<()>;

    /// Binds to a local address.
    ///
    /// # Errors
    /// Fails if the socket is already bound or the address is taken.
    fn bind(&self, sock: UdtSocketId, addr: SocketAddr) -> NativeResult<()>;

    /// Binds over an existing system UDP socket.
    ///
    /// # Errors
    /// Fails if the system socket is not usable.
    fn bind_existing(&self, sock: UdtSocketId, sys: SysSocketId) -> NativeResult<()>;

    /// Starts listening.
    ///
    /// # Errors
    /// Fails on unbound or connected sockets and on a negative backlog.
    fn listen(&self, sock: UdtSocketId, backlog: i32) -> NativeResult<()>;

    /// Connects to a peer.
    ///
    /// # Errors
    /// Fails if no server listens at `addr` or the server rejects.
    fn connect(&self, sock: UdtSocketId, addr: SocketAddr) -> NativeResult<()>;

    /// Accepts a pending connection, blocking until one exists.
    ///
    /// # Errors
    /// Fails on non-listening sockets.
    fn accept(&self, sock: UdtSocketId) -> NativeResult<(UdtSocketId, SocketAddr)>;

    /// Sends bytes, returning how many were taken.
    ///
    /// # Errors
    /// Fails on unconnected or broken sockets.
    fn send(&self, sock: UdtSocketId, buf: &[u8]) -> NativeResult<usize>;

    /// Receives into `buf`, blocking until data or disconnect.
    ///
    /// # Errors
    /// Fails on unconnected or broken sockets.
    fn recv(&self, sock: UdtSocketId, buf: &mut [u8]) -> NativeResult<usize>;

    /// Closes a socket.
    ///
    /// # Errors
    /// Fails with `InvalidSock` on an unknown descriptor.
    fn close(&self, sock: UdtSocketId) -> NativeResult<()>;

    /// Current native state of a socket.
    fn status(&self, sock: UdtSocketId) -> SocketStatus;

    // ========================================
    // Epoll
    // ========================================

    /// Allocates an epoll context.
    ///
    /// # Errors
    /// Fails on resource exhaustion or before startup.
    fn epoll_create(&self) -> NativeResult<EpollId>;

    /// Registers a transport socket; `None` means every event.
    ///
    /// # Errors
    /// Fails on an invalid epoll id or socket.
    fn epoll_add_usock(
        &self,
        eid: EpollId,
        sock: UdtSocketId,
        events: Option<EventMask>,
    ) -> NativeResult<()>;

    /// Deregisters a transport socket.
    ///
    /// # Errors
    /// Fails on an invalid epoll id or a socket never registered.
    fn epoll_remove_usock(&self, eid: EpollId, sock: UdtSocketId) -> NativeResult<()>;

    /// Registers a system socket; `None` means every event.
    ///
    /// # Errors
    /// Fails on an invalid epoll id.
    fn epoll_add_ssock(
        &self,
        eid: EpollId,
        sys: SysSocketId,
        events: Option<EventMask>,
    ) -> NativeResult<()>;

    /// Deregisters a system socket.
    ///
    /// # Errors
    /// Fails on an invalid epoll id or a socket never registered.
    fn epoll_remove_ssock(&self, eid: EpollId, sys: SysSocketId) -> NativeResult<()>;

    /// Waits for readiness and fills `out` per `interest`.
    ///
    /// Categories not requested are left empty. Returns the total number of
    /// ready entries.
    ///
    /// # Errors
    /// Fails with `Timeout` when nothing became ready in time, and with
    /// `InvalidParam` when no category is requested.
    fn epoll_wait(
        &self,
        eid: EpollId,
        interest: WaitInterest,
        timeout: WaitTimeout,
        out: &mut ReadySets,
    ) -> NativeResult<usize>;

    /// Releases an epoll context.
    ///
    /// # Errors
    /// Fails on an invalid epoll id.
    fn epoll_release(&self, eid: EpollId) -> NativeResult<()>;

    // ========================================
    // Last Error
    // ========================================

    /// The calling thread's last error.
    fn last_error(&self) -> EngineFault;

    /// Resets the calling thread's last error.
    fn clear_error(&self);
}
