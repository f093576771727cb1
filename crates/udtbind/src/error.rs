// ============================================
// File: crates/udtbind/src/error.rs
// ============================================
//! # Binding Error Types
//!
//! ## Creation Reason
//! Callers see one structured failure for everything this layer raises,
//! whether it came from the native engine, from argument handling or from
//! the host runtime. The kind tells them which operation failed.
//!
//! ## Main Functionality
//! - `ErrorKind`: Which operation class raised the failure
//! - `UdtError`: Kind + numeric code + message + extra payload
//! - `Result<T>`: Type alias using `UdtError`
//!
//! ## Error Categories
//! 1. **Argument**: Rejected before any native call (code 0)
//! 2. **Engine**: Generic native failure (startup, allocation)
//! 3. **Bind / Listen / Connect / Accept / Io / Wait**: Native failure of
//!    that specific operation
//! 4. **ClosedHandle**: The native descriptor is already gone
//!
//! ## ⚠️ Important Note for Next Developer
//! - Callers pattern-match on `kind()`; never change the kind a given
//!   operation raises without a version bump
//! - Native failures are built by `bridge::translate_engine_error`, not here
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::fmt;

use thiserror::Error;

use udtbind_common::error::CommonError;
use udtbind_engine::error::ErrorCode;

// ============================================
// Result Type Alias
// ============================================

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, UdtError>;

// ============================================
// ErrorKind
// ============================================

/// Operation class that raised a [`UdtError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing call arguments.
    Argument,
    /// Generic native engine failure.
    Engine,
    /// `bind` / `bind_to_existing` failed.
    Bind,
    /// `listen` failed.
    Listen,
    /// `connect` failed.
    Connect,
    /// `accept` failed.
    Accept,
    /// `send` / `recv` failed.
    Io,
    /// Multiplexer `wait` failed.
    Wait,
    /// The handle's native descriptor is gone.
    ClosedHandle,
}

impl ErrorKind {
    /// Name callers see for this kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Argument => "ArgumentError",
            Self::Engine => "EngineError",
            Self::Bind => "BindError",
            Self::Listen => "ListenError",
            Self::Connect => "ConnectError",
            Self::Accept => "AcceptError",
            Self::Io => "IOError",
            Self::Wait => "WaitError",
            Self::ClosedHandle => "ClosedHandleError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// UdtError
// ============================================

/// Structured failure raised by the binding layer.
///
/// # Fields
/// - `code`: native error code, `0` when the failure did not come from
///   the engine
/// - `message`: human-readable description
/// - `extra`: optional payload (host trace, offending value)
///
/// # Example
/// ```
/// use udtbind::error::{ErrorKind, UdtError};
///
/// let err = UdtError::argument("port must be non-negative");
/// assert_eq!(err.kind(), ErrorKind::Argument);
/// assert_eq!(err.code(), 0);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct UdtError {
    kind: ErrorKind,
    code: i32,
    message: String,
    extra: String,
    /// Raised by the binding before reaching the engine
    local: bool,
}

impl UdtError {
    /// Creates an error with an empty extra payload.
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            extra: String::new(),
            local: false,
        }
    }

    /// Creates an error the binding raises without a native call, even if
    /// it carries a native code.
    pub fn local(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::new(kind, code, message)
        }
    }

    /// Creates an `Argument` error.
    pub fn argument(reason: impl Into<String>) -> Self {
        Self::local(ErrorKind::Argument, 0, reason)
    }

    /// Creates a `ClosedHandle` error for an operation on a closed handle.
    pub fn closed_handle(operation: &str) -> Self {
        Self::local(
            ErrorKind::ClosedHandle,
            ErrorCode::InvalidSock.code(),
            format!("{operation} on a closed socket handle"),
        )
    }

    /// Attaches an extra payload.
    #[must_use]
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Replaces the kind, keeping code, message and payload.
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Operation class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Numeric code (`0` if not from the engine).
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Extra payload, empty if none.
    #[must_use]
    pub fn extra(&self) -> &str {
        &self.extra
    }

    /// Native code, if the failure came from the engine.
    #[must_use]
    pub fn native_code(&self) -> Option<ErrorCode> {
        (self.code != 0).then(|| ErrorCode::from_code(self.code))
    }

    /// Returns `true` if the failure came from the native engine.
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        !self.local
    }

    /// Returns `true` if repeating the operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.native_code() {
            Some(code) => code.is_transient() || code == ErrorCode::ConnRejected,
            None => false,
        }
    }
}

impl From<CommonError> for UdtError {
    fn from(err: CommonError) -> Self {
        let CommonError::InvalidAddress { reason, .. } = &err;
        let extra = reason.clone();
        Self::argument(err.to_string()).with_extra(extra)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UdtError::new(ErrorKind::Bind, 1003, "[UDT error 1003] bind failed");
        assert_eq!(err.to_string(), "[UDT error 1003] bind failed");
        assert_eq!(err.kind().to_string(), "BindError");
    }

    #[test]
    fn test_error_classification() {
        let timeout = UdtError::new(ErrorKind::Io, 6003, "timeout");
        assert!(timeout.is_retryable());
        assert!(timeout.is_engine_error());

        let lost = UdtError::new(ErrorKind::Io, 2001, "lost");
        assert!(!lost.is_retryable());

        let arg = UdtError::argument("bad");
        assert!(!arg.is_engine_error());
        assert_eq!(arg.native_code(), None);
    }

    #[test]
    fn test_closed_handle() {
        let err = UdtError::closed_handle("send");
        assert_eq!(err.kind(), ErrorKind::ClosedHandle);
        assert_eq!(err.native_code(), Some(ErrorCode::InvalidSock));
        assert!(err.message().starts_with("send"));
        assert!(!err.is_engine_error());
    }

    #[test]
    fn test_from_common_error() {
        let err: UdtError = CommonError::invalid_address("nowhere:1", "unknown host").into();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.code(), 0);
        assert_eq!(err.extra(), "unknown host");
    }
}
