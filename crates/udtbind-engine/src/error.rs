// ============================================
// File: crates/udtbind-engine/src/error.rs
// ============================================
//! # Native Error Codes
//!
//! ## Creation Reason
//! The native engine reports failures the C way: the call returns a failure
//! marker and the detail sits in a last-error record. This module models
//! both halves so engines and the binding layer speak the same codes.
//!
//! ## Main Functionality
//! - `ErrorCode`: The engine's numeric error table with stock messages
//! - `EngineFault`: Contents of the last-error record
//! - `CallFailed` / `NativeResult<T>`: The failure marker
//!
//! ## Error Categories
//! 1. **Setup** (1xxx): connection setup, rendezvous, security
//! 2. **Connection** (2xxx): lost or missing connections
//! 3. **Resource** (3xxx): memory, threads, buffers
//! 4. **File** (4xxx): file transfer
//! 5. **Operation** (5xxx): misuse of sockets and epolls
//! 6. **Async** (6xxx): non-blocking calls and timeouts
//!
//! ## ⚠️ Important Note for Next Developer
//! - `CallFailed` carries nothing on purpose; read the engine's last error
//!   right after the failing call and clear it
//! - Numeric values are part of the caller-visible contract, never renumber
//!
//! ## Last Modified
//! v0.1.0 - Initial error table

use std::fmt;

use thiserror::Error;

// ============================================
// NativeResult
// ============================================

/// Result of a native engine call.
pub type NativeResult<T> = std::result::Result<T, CallFailed>;

/// Failure marker returned by native engine calls.
///
/// The detail lives in the engine's last-error record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("native call failed")]
pub struct CallFailed;

// ============================================
// ErrorCode
// ============================================

/// Numeric error codes of the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// No error.
    Success,
    /// Connection setup failure.
    ConnSetup,
    /// Server does not exist.
    NoServer,
    /// Connection rejected by the server.
    ConnRejected,
    /// Socket creation or configuration failed.
    SockFail,
    /// Security check failed.
    SecFail,
    /// Connection broken.
    ConnFail,
    /// Connection lost.
    ConnLost,
    /// Socket not connected.
    NoConn,
    /// Out of resources.
    Resource,
    /// Thread creation failed.
    Thread,
    /// Out of buffer space.
    NoBuf,
    /// File access error.
    File,
    /// Invalid file read parameters.
    InvalidReadParams,
    /// Invalid file write parameters.
    InvalidWriteParams,
    /// Read access denied.
    ReadDenied,
    /// Write access denied.
    WriteDenied,
    /// Operation not supported.
    InvalidOp,
    /// Socket already bound.
    BoundSock,
    /// Socket already connected.
    ConnSock,
    /// Invalid parameter.
    InvalidParam,
    /// Invalid socket.
    InvalidSock,
    /// Socket not bound.
    UnboundSock,
    /// Socket is not listening.
    NoListen,
    /// Rendezvous connection to a listening socket.
    RendezvousNoServer,
    /// Rendezvous on an unbound socket.
    RendezvousUnbound,
    /// Stream operation on a datagram socket.
    StreamIllegal,
    /// Datagram operation on a stream socket.
    DgramIllegal,
    /// Another socket already listens on the port.
    DuplicateListen,
    /// Message larger than the send buffer.
    LargeMessage,
    /// Invalid epoll id.
    InvalidPollId,
    /// Non-blocking call failed.
    AsyncFail,
    /// No buffer available for a non-blocking send.
    AsyncSend,
    /// No data available for a non-blocking receive.
    AsyncRecv,
    /// Operation timed out.
    Timeout,
    /// Error reported by the peer.
    PeerError,
    /// Code outside the table.
    Unknown(i32),
}

impl ErrorCode {
    /// Numeric value of the code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ConnSetup => 1000,
            Self::NoServer => 1001,
            Self::ConnRejected => 1002,
            Self::SockFail => 1003,
            Self::SecFail => 1004,
            Self::ConnFail => 2000,
            Self::ConnLost => 2001,
            Self::NoConn => 2002,
            Self::Resource => 3000,
            Self::Thread => 3001,
            Self::NoBuf => 3002,
            Self::File => 4000,
            Self::InvalidReadParams => 4001,
            Self::InvalidWriteParams => 4002,
            Self::ReadDenied => 4003,
            Self::WriteDenied => 4004,
            Self::InvalidOp => 5000,
            Self::BoundSock => 5001,
            Self::ConnSock => 5002,
            Self::InvalidParam => 5003,
            Self::InvalidSock => 5004,
            Self::UnboundSock => 5005,
            Self::NoListen => 5006,
            Self::RendezvousNoServer => 5007,
            Self::RendezvousUnbound => 5008,
            Self::StreamIllegal => 5009,
            Self::DgramIllegal => 5010,
            Self::DuplicateListen => 5011,
            Self::LargeMessage => 5012,
            Self::InvalidPollId => 5013,
            Self::AsyncFail => 6000,
            Self::AsyncSend => 6001,
            Self::AsyncRecv => 6002,
            Self::Timeout => 6003,
            Self::PeerError => 7000,
            Self::Unknown(code) => *code,
        }
    }

    /// Looks up a numeric value; anything outside the table is `Unknown`.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1000 => Self::ConnSetup,
            1001 => Self::NoServer,
            1002 => Self::ConnRejected,
            1003 => Self::SockFail,
            1004 => Self::SecFail,
            2000 => Self::ConnFail,
            2001 => Self::ConnLost,
            2002 => Self::NoConn,
            3000 => Self::Resource,
            3001 => Self::Thread,
            3002 => Self::NoBuf,
            4000 => Self::File,
            4001 => Self::InvalidReadParams,
            4002 => Self::InvalidWriteParams,
            4003 => Self::ReadDenied,
            4004 => Self::WriteDenied,
            5000 => Self::InvalidOp,
            5001 => Self::BoundSock,
            5002 => Self::ConnSock,
            5003 => Self::InvalidParam,
            5004 => Self::InvalidSock,
            5005 => Self::UnboundSock,
            5006 => Self::NoListen,
            5007 => Self::RendezvousNoServer,
            5008 => Self::RendezvousUnbound,
            5009 => Self::StreamIllegal,
            5010 => Self::DgramIllegal,
            5011 => Self::DuplicateListen,
            5012 => Self::LargeMessage,
            5013 => Self::InvalidPollId,
            6000 => Self::AsyncFail,
            6001 => Self::AsyncSend,
            6002 => Self::AsyncRecv,
            6003 => Self::Timeout,
            7000 => Self::PeerError,
            other => Self::Unknown(other),
        }
    }

    /// Stock message for the code.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::ConnSetup => "Connection setup failure",
            Self::NoServer => "Connection setup failure: connection time out",
            Self::ConnRejected => "Connection setup failure: connection rejected",
            Self::SockFail => {
                "Connection setup failure: unable to create/configure UDP socket"
            }
            Self::SecFail => "Connection setup failure: abort for security reasons",
            Self::ConnFail => "Connection was broken",
            Self::ConnLost => "Connection was broken: connection was lost",
            Self::NoConn => "Connection was broken: connection does not exist",
            Self::Resource => "System resource failure",
            Self::Thread => "System resource failure: unable to create new threads",
            Self::NoBuf => "System resource failure: unable to allocate buffers",
            Self::File => "File system failure",
            Self::InvalidReadParams => {
                "File system failure: cannot seek read position"
            }
            Self::InvalidWriteParams => {
                "File system failure: cannot seek write position"
            }
            Self::ReadDenied => "File system failure: failure in read",
            Self::WriteDenied => "File system failure: failure in write",
            Self::InvalidOp => "Operation not supported",
            Self::BoundSock => {
                "Operation not supported: Cannot do this operation on a BOUND socket"
            }
            Self::ConnSock => {
                "Operation not supported: Cannot do this operation on a CONNECTED socket"
            }
            Self::InvalidParam => "Operation not supported: Bad parameters",
            Self::InvalidSock => "Operation not supported: Invalid socket ID",
            Self::UnboundSock => {
                "Operation not supported: Cannot do this operation on an UNBOUND socket"
            }
            Self::NoListen => "Operation not supported: Socket is not in listening state",
            Self::RendezvousNoServer => {
                "Operation not supported: Listen/accept is not supported in rendezous connection setup"
            }
            Self::RendezvousUnbound => {
                "Operation not supported: Cannot call connect on UNBOUND socket in rendezvous connection setup"
            }
            Self::StreamIllegal => {
                "Operation not supported: This operation is not supported in SOCK_STREAM mode"
            }
            Self::DgramIllegal => {
                "Operation not supported: This operation is not supported in SOCK_DGRAM mode"
            }
            Self::DuplicateListen => {
                "Operation not supported: Another socket is already listening on the same port"
            }
            Self::LargeMessage => {
                "Operation not supported: Message is too large to send"
            }
            Self::InvalidPollId => "Operation not supported: Invalid epoll ID",
            Self::AsyncFail => "Non-blocking call failure",
            Self::AsyncSend => {
                "Non-blocking call failure: no buffer available for sending"
            }
            Self::AsyncRecv => "Non-blocking call failure: no data available for reading",
            Self::Timeout => "Non-blocking call failure: transmission timeout",
            Self::PeerError => "The peer side has signalled an error",
            Self::Unknown(_) => "Unknown error",
        }
    }

    /// Returns `true` for codes a caller may retry after waiting.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AsyncFail | Self::AsyncSend | Self::AsyncRecv | Self::Timeout | Self::NoBuf
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

// ============================================
// EngineFault
// ============================================

/// Contents of the engine's last-error record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFault {
    /// Numeric code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl EngineFault {
    /// The cleared state.
    #[must_use]
    pub fn none() -> Self {
        Self::from_code(ErrorCode::Success)
    }

    /// A fault carrying the stock message of `code`.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
        }
    }

    /// A fault with a stock message plus detail.
    pub fn with_detail(code: ErrorCode, detail: impl fmt::Display) -> Self {
        Self {
            code,
            message: format!("{}: {detail}", code.message()),
        }
    }

    /// Returns `true` for the cleared state.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

impl Default for EngineFault {
    fn default() -> Self {
        Self::none()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        for code in [0, 1001, 2001, 3002, 4003, 5004, 5013, 6003, 7000] {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
        assert_eq!(ErrorCode::from_code(5004), ErrorCode::InvalidSock);
        assert_eq!(ErrorCode::from_code(6003), ErrorCode::Timeout);
    }

    #[test]
    fn test_unknown_code() {
        let code = ErrorCode::from_code(-1);
        assert_eq!(code, ErrorCode::Unknown(-1));
        assert_eq!(code.code(), -1);
        assert_eq!(code.message(), "Unknown error");
    }

    #[test]
    fn test_fault() {
        assert!(EngineFault::none().is_none());
        assert_eq!(EngineFault::default().message, "Success");

        let fault = EngineFault::with_detail(ErrorCode::SockFail, "127.0.0.1:9 in use");
        assert!(!fault.is_none());
        assert!(fault.message.ends_with("127.0.0.1:9 in use"));
    }

    #[test]
    fn test_transient() {
        assert!(ErrorCode::Timeout.is_transient());
        assert!(!ErrorCode::InvalidSock.is_transient());
    }
}
