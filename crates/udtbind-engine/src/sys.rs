// ============================================
// File: crates/udtbind-engine/src/sys.rs
// ============================================
//! # System Socket Helpers
//!
//! ## Creation Reason
//! Engines need two things from plain OS sockets: the local address of a
//! socket being adopted, and the readiness of sockets sharing an epoll with
//! transport sockets.
//!
//! ## Main Functionality
//! - `local_addr()`: Bound address of a system socket
//! - `poll_ready()`: Non-blocking readiness check via `poll(2)`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Descriptors are borrowed, never closed here
//! - Uses unsafe for raw descriptor access (audited)
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::io;
use std::net::SocketAddr;

use udtbind_common::types::SysSocketId;

// ============================================
// Local Address
// ============================================

/// Returns the address a system socket is bound to.
///
/// # Errors
/// Fails if the descriptor is not a socket or has no inet address.
#[cfg(unix)]
pub fn local_addr(sys: SysSocketId) -> io::Result<SocketAddr> {
    use std::os::unix::io::BorrowedFd;

    if sys.raw() < 0 {
        return Err(io::Error::from_raw_os_error(nix::libc::EBADF));
    }

    // SAFETY: the descriptor is only borrowed for the duration of this call;
    // the caller guarantees it stays open meanwhile.
    let fd = unsafe { BorrowedFd::borrow_raw(sys.raw()) };
    let sock = socket2::SockRef::from(&fd);
    sock.local_addr()?.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket")
    })
}

/// Returns the address a system socket is bound to.
///
/// # Errors
/// Always fails on platforms without raw descriptor support.
#[cfg(not(unix))]
pub fn local_addr(_sys: SysSocketId) -> io::Result<SocketAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "system sockets are not supported on this platform",
    ))
}

// ============================================
// Readiness
// ============================================

/// Readiness of one system socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SysReadiness {
    /// Data (or EOF) can be read without blocking.
    pub readable: bool,
    /// Data can be written without blocking.
    pub writable: bool,
}

/// Polls system sockets without blocking.
///
/// Descriptors reporting an error or hang-up count as both readable and
/// writable so the caller finds out on its next call.
///
/// # Errors
/// Fails if `poll(2)` fails.
#[cfg(unix)]
pub fn poll_ready(fds: &[SysSocketId]) -> io::Result<Vec<SysReadiness>> {
    use nix::libc;

    if fds.is_empty() {
        return Ok(Vec::new());
    }

    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd.raw(),
            events: libc::POLLIN | libc::POLLOUT,
            revents: 0,
        })
        .collect();

    let nfds = libc::nfds_t::try_from(pollfds.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many descriptors"))?;

    // SAFETY: pollfds is a valid, exclusively borrowed array of nfds entries.
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(pollfds
        .iter()
        .map(|p| {
            let failed = p.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
            SysReadiness {
                readable: failed || p.revents & libc::POLLIN != 0,
                writable: failed || p.revents & libc::POLLOUT != 0,
            }
        })
        .collect())
}

/// Polls system sockets without blocking.
///
/// # Errors
/// Always fails on platforms without raw descriptor support.
#[cfg(not(unix))]
pub fn poll_ready(fds: &[SysSocketId]) -> io::Result<Vec<SysReadiness>> {
    if fds.is_empty() {
        return Ok(Vec::new());
    }
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "system sockets are not supported on this platform",
    ))
}

// ============================================
// Tests
// ============================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    #[test]
    fn test_local_addr_of_udp_socket() {
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let expected = udp.local_addr().unwrap();
        assert_eq!(local_addr(SysSocketId::from(&udp)).unwrap(), expected);
    }

    #[test]
    fn test_local_addr_rejects_negative() {
        assert!(local_addr(SysSocketId::new(-1)).is_err());
    }

    #[test]
    fn test_poll_ready() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();

        let ready = poll_ready(&[SysSocketId::from(&a)]).unwrap();
        assert!(!ready[0].readable);
        assert!(ready[0].writable);

        b.send_to(b"ping", a.local_addr().unwrap()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let ready = poll_ready(&[SysSocketId::from(&a)]).unwrap();
        assert!(ready[0].readable);
    }

    #[test]
    fn test_poll_ready_empty() {
        assert!(poll_ready(&[]).unwrap().is_empty());
    }
}
