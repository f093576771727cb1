// ============================================
// File: crates/udtbind-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the value types that cross the native engine boundary, so a
//! transport descriptor can never be confused with a system descriptor or an
//! epoll id, and readiness results always come back in the same shape.
//!
//! ## Main Functionality
//! - `UdtSocketId` / `SysSocketId` / `EpollId`: Descriptor newtypes
//! - `AddressFamily` / `SocketKind`: Creation parameters with native values
//! - `Endpoint`: Host string + port, resolvable to a `SocketAddr`
//! - `SocketStatus`: Native socket state as reported by the engine
//! - `EventMask`: Epoll interest bits
//! - `WaitInterest` / `ReadySets`: What a wait asks for and what it found
//!
//! ## Main Logical Flow
//! 1. Callers build endpoints and creation parameters
//! 2. The engine hands out descriptors as newtypes
//! 3. Multiplexer waits fill a `ReadySets` per the caller's `WaitInterest`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Transport and system descriptors are disjoint universes; never add a
//!   conversion between `UdtSocketId` and `SysSocketId`
//! - `AddressFamily::raw` uses Linux numbering, the only platform the engine
//!   normalizes for us
//! - An empty endpoint host means "any address" for bind
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

// ============================================
// Descriptor Newtypes
// ============================================

/// Descriptor of a transport socket, allocated by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UdtSocketId(i32);

impl UdtSocketId {
    /// Marker value the native engine uses for "no socket".
    pub const INVALID: Self = Self(-1);

    /// Wraps a raw native descriptor.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw native descriptor.
    #[must_use]
    pub const fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for UdtSocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor of an ordinary operating-system socket.
///
/// This layer never owns system descriptors; it only passes them through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SysSocketId(i32);

impl SysSocketId {
    /// Wraps a raw OS descriptor.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw OS descriptor.
    #[must_use]
    pub const fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for SysSocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(unix)]
impl<T: std::os::unix::io::AsRawFd> From<&T> for SysSocketId {
    fn from(socket: &T) -> Self {
        Self(socket.as_raw_fd())
    }
}

/// Identifier of a native epoll context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpollId(i32);

impl EpollId {
    /// Wraps a raw native epoll id.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw native epoll id.
    #[must_use]
    pub const fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for EpollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// AddressFamily / SocketKind
// ============================================

/// Address family of a transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4 (`AF_INET`).
    #[default]
    Inet,
    /// IPv6 (`AF_INET6`).
    Inet6,
}

impl AddressFamily {
    /// Native numeric value.
    #[must_use]
    pub const fn raw(&self) -> i32 {
        match self {
            Self::Inet => 2,
            Self::Inet6 => 10,
        }
    }

    /// Parses a native numeric value.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            2 => Some(Self::Inet),
            10 => Some(Self::Inet6),
            _ => None,
        }
    }

    /// Constant name as used in descriptions.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Inet => "AF_INET",
            Self::Inet6 => "AF_INET6",
        }
    }

    /// Family of a resolved address.
    #[must_use]
    pub const fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::Inet,
            SocketAddr::V6(_) => Self::Inet6,
        }
    }

    /// The wildcard address of this family.
    #[must_use]
    pub const fn unspecified(&self) -> IpAddr {
        match self {
            Self::Inet => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Inet6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport socket kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    /// Byte stream (`SOCK_STREAM`).
    #[default]
    Stream,
    /// Message oriented (`SOCK_DGRAM`).
    Datagram,
}

impl SocketKind {
    /// Native numeric value.
    #[must_use]
    pub const fn raw(&self) -> i32 {
        match self {
            Self::Stream => 1,
            Self::Datagram => 2,
        }
    }

    /// Parses a native numeric value.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::Stream),
            2 => Some(Self::Datagram),
            _ => None,
        }
    }

    /// Constant name as used in descriptions.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stream => "SOCK_STREAM",
            Self::Datagram => "SOCK_DGRAM",
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// Endpoint
// ============================================

/// A host/port pair as callers write it.
///
/// The host is either numeric or a resolvable name; an empty host stands
/// for the wildcard address.
///
/// # Example
/// ```
/// use udtbind_common::types::{AddressFamily, Endpoint};
///
/// let ep: Endpoint = "127.0.0.1:9000".parse().unwrap();
/// assert_eq!(ep.host(), "127.0.0.1");
/// assert_eq!(ep.port(), 9000);
///
/// let addr = ep.resolve(AddressFamily::Inet).unwrap();
/// assert_eq!(addr.to_string(), "127.0.0.1:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Wildcard endpoint for the given port.
    #[must_use]
    pub fn any(port: u16) -> Self {
        Self::new(String::new(), port)
    }

    /// Host part as given.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Resolves to a socket address of the requested family.
    ///
    /// Numeric hosts are parsed directly; names go through the system
    /// resolver and the first address of the requested family wins.
    ///
    /// # Errors
    /// `CommonError::InvalidAddress` if the host cannot be resolved to an
    /// address of `family`.
    pub fn resolve(&self, family: AddressFamily) -> Result<SocketAddr> {
        if self.host.is_empty() {
            return Ok(SocketAddr::new(family.unspecified(), self.port));
        }

        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            let addr = SocketAddr::new(ip, self.port);
            if AddressFamily::of(&addr) != family {
                return Err(CommonError::invalid_address(
                    self.to_string(),
                    format!("not an {} address", family.name()),
                ));
            }
            return Ok(addr);
        }

        let candidates = (host, self.port)
            .to_socket_addrs()
            .map_err(|e| CommonError::invalid_address(self.to_string(), e.to_string()))?;

        candidates
            .into_iter()
            .find(|addr| AddressFamily::of(addr) == family)
            .ok_or_else(|| {
                CommonError::invalid_address(
                    self.to_string(),
                    format!("no {} address for host", family.name()),
                )
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CommonError::invalid_address(s, "expected host:port"))?;

        let port = port
            .parse::<u16>()
            .map_err(|e| CommonError::invalid_address(s, format!("bad port: {e}")))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl From<(&str, u16)> for Endpoint {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for Endpoint {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<Endpoint> for (String, u16) {
    fn from(ep: Endpoint) -> Self {
        (ep.host, ep.port)
    }
}

// ============================================
// SocketStatus
// ============================================

/// Native state of a transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketStatus {
    /// Allocated, nothing else done.
    Init,
    /// Bound to a local address.
    Opened,
    /// Accepting connections.
    Listening,
    /// Connection setup in progress.
    Connecting,
    /// Connected to a peer.
    Connected,
    /// Connection lost.
    Broken,
    /// Close in progress.
    Closing,
    /// Closed.
    Closed,
    /// Descriptor unknown to the engine.
    NonExistent,
}

impl SocketStatus {
    /// Returns `true` for states a garbage-collection sweep reclaims.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        matches!(self, Self::Broken | Self::Closed | Self::NonExistent)
    }
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Opened => "OPENED",
            Self::Listening => "LISTENING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Broken => "BROKEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::NonExistent => "NONEXIST",
        };
        f.write_str(name)
    }
}

// ============================================
// EventMask
// ============================================

/// Epoll interest bits.
///
/// # Example
/// ```
/// use udtbind_common::types::EventMask;
///
/// let mask = EventMask::IN | EventMask::ERR;
/// assert!(mask.contains(EventMask::IN));
/// assert!(!mask.contains(EventMask::OUT));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u32);

impl EventMask {
    /// Readable.
    pub const IN: Self = Self(0x1);
    /// Writable.
    pub const OUT: Self = Self(0x4);
    /// Error / hang-up.
    pub const ERR: Self = Self(0x8);
    /// What the engine applies when no mask is given.
    pub const ALL: Self = Self(0x1 | 0x4 | 0x8);

    /// Builds a mask from raw bits, dropping unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ============================================
// WaitInterest / ReadySets
// ============================================

/// Which readiness categories a wait asks for.
///
/// Defaults to transport read + transport write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct WaitInterest {
    /// Report readable transport sockets.
    pub transport_read: bool,
    /// Report writable transport sockets.
    pub transport_write: bool,
    /// Report readable system sockets.
    pub system_read: bool,
    /// Report writable system sockets.
    pub system_write: bool,
}

impl Default for WaitInterest {
    fn default() -> Self {
        Self {
            transport_read: true,
            transport_write: true,
            system_read: false,
            system_write: false,
        }
    }
}

impl WaitInterest {
    /// No category requested.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            transport_read: false,
            transport_write: false,
            system_read: false,
            system_write: false,
        }
    }

    /// Every category requested.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            transport_read: true,
            transport_write: true,
            system_read: true,
            system_write: true,
        }
    }

    /// Sets the transport-read flag.
    #[must_use]
    pub const fn transport_read(mut self, on: bool) -> Self {
        self.transport_read = on;
        self
    }

    /// Sets the transport-write flag.
    #[must_use]
    pub const fn transport_write(mut self, on: bool) -> Self {
        self.transport_write = on;
        self
    }

    /// Sets the system-read flag.
    #[must_use]
    pub const fn system_read(mut self, on: bool) -> Self {
        self.system_read = on;
        self
    }

    /// Sets the system-write flag.
    #[must_use]
    pub const fn system_write(mut self, on: bool) -> Self {
        self.system_write = on;
        self
    }

    /// Returns `true` if at least one category is requested.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.transport_read || self.transport_write || self.system_read || self.system_write
    }

    /// Returns `true` if either system category is requested.
    #[must_use]
    pub const fn wants_system(&self) -> bool {
        self.system_read || self.system_write
    }
}

/// The four readiness sets filled by one wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadySets {
    /// Readable transport sockets.
    pub transport_read: BTreeSet<UdtSocketId>,
    /// Writable transport sockets.
    pub transport_write: BTreeSet<UdtSocketId>,
    /// Readable system sockets.
    pub system_read: BTreeSet<SysSocketId>,
    /// Writable system sockets.
    pub system_write: BTreeSet<SysSocketId>,
}

impl ReadySets {
    /// Empties all four sets.
    pub fn clear(&mut self) {
        self.transport_read.clear();
        self.transport_write.clear();
        self.system_read.clear();
        self.system_write.clear();
    }

    /// Sum of the four set sizes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.transport_read.len()
            + self.transport_write.len()
            + self.system_read.len()
            + self.system_write.len()
    }

    /// Returns `true` if nothing is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// ============================================
// Tests
// ============================================
