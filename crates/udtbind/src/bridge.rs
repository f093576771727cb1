// ============================================
// File: crates/udtbind/src/bridge.rs
// ============================================
//! # Error Bridge
//!
//! ## Creation Reason
//! The engine reports failures through a last-error record that outlives
//! the failing call. This module is the only place that reads it, and it
//! always clears it in the same step, so a stale error can never be
//! attributed to a later unrelated call.
//!
//! ## Main Functionality
//! - `take_fault()`: Read-and-clear of the engine's last error
//! - `translate_engine_error()`: Last error -> `UdtError` of a given kind
//! - `fault_error()`: Same, for a fault the caller already took
//! - `translate_host_exception()`: Host runtime fault -> `UdtError`
//!
//! ## Main Logical Flow
//! 1. A native call returns `CallFailed`
//! 2. The caller (on the same thread, lock reacquired) calls
//!    `translate_engine_error` with the kind for its operation
//! 3. The record is cleared and the failure is logged once, here
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never insert another native call between the failure and translation
//! - Message format `[UDT error N] text` is relied on by callers' logs
//!
//! ## Last Modified
//! v0.1.0 - Initial bridge

use std::fmt;

use tracing::error;

use udtbind_engine::error::EngineFault;
use udtbind_engine::Engine;

use crate::error::{ErrorKind, UdtError};

// ============================================
// Engine Errors
// ============================================

/// Reads the calling thread's last engine error and clears it.
pub fn take_fault(engine: &dyn Engine) -> EngineFault {
    let fault = engine.last_error();
    engine.clear_error();
    fault
}

/// Formats a fault the way every engine failure is reported.
#[must_use]
pub fn format_fault(fault: &EngineFault) -> String {
    format!("[UDT error {}] {}", fault.code.code(), fault.message)
}

/// Turns the engine's last error into a failure of `kind`.
///
/// The engine's record is cleared as part of the translation.
///
/// # Example
/// ```
/// use udtbind::bridge::translate_engine_error;
/// use udtbind::error::ErrorKind;
/// use udtbind_engine::{Engine, LoopbackEngine};
/// use udtbind_common::types::UdtSocketId;
///
/// let engine = LoopbackEngine::new();
/// assert!(engine.close(UdtSocketId::new(7)).is_err());
///
/// let err = translate_engine_error(&engine, ErrorKind::Engine);
/// assert_eq!(err.code(), 5004);
/// assert!(engine.last_error().is_none());
/// ```
pub fn translate_engine_error(engine: &dyn Engine, kind: ErrorKind) -> UdtError {
    fault_error(&take_fault(engine), kind)
}

/// Builds the failure for an already taken fault.
#[must_use]
pub fn fault_error(fault: &EngineFault, kind: ErrorKind) -> UdtError {
    let code = fault.code.code();
    error!(kind = %kind, code, message = %fault.message, "Native call failed");
    UdtError::new(kind, code, format_fault(fault))
}

// ============================================
// Host Errors
// ============================================

/// A fault raised by the host runtime while marshaling a call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostError {
    /// Rendered exception value, if the host could render it.
    pub value: Option<String>,
    /// Rendered traceback, if any.
    pub traceback: Option<String>,
}

impl HostError {
    /// A host fault with a rendered value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            traceback: None,
        }
    }

    /// Attaches a rendered traceback.
    #[must_use]
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Host runtime error")?;
        match &self.value {
            Some(value) => write!(f, ": {value}"),
            None => f.write_str(": unrenderable value"),
        }
    }
}

/// Wraps a host runtime fault into the binding's failure type.
///
/// The traceback, when present, travels in the extra payload.
#[must_use]
pub fn translate_host_exception(host: &HostError) -> UdtError {
    error!(error = %host, "Host runtime fault at call boundary");
    UdtError::argument(host.to_string()).with_extra(host.traceback.clone().unwrap_or_default())
}

impl From<HostError> for UdtError {
    fn from(host: HostError) -> Self {
        translate_host_exception(&host)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use udtbind_common::types::{AddressFamily, SocketKind, UdtSocketId};
    use udtbind_engine::error::ErrorCode;
    use udtbind_engine::{LoopbackEngine, Op};

    #[test]
    fn test_translate_clears_state() {
        let engine = LoopbackEngine::new();
        assert!(engine.close(UdtSocketId::new(99)).is_err());

        let first = translate_engine_error(&engine, ErrorKind::Engine);
        assert_eq!(first.code(), ErrorCode::InvalidSock.code());
        assert!(first.message().starts_with("[UDT error 5004]"));

        // Nothing failed in between: the second read is the cleared state.
        let second = translate_engine_error(&engine, ErrorKind::Engine);
        assert_eq!(second.code(), 0);
        assert_eq!(second.message(), "[UDT error 0] Success");
    }

    #[test]
    fn test_translate_keeps_kind() {
        let engine = LoopbackEngine::new();
        engine.fail_next(Op::Socket, ErrorCode::Resource);
        assert!(engine
            .socket(AddressFamily::Inet, SocketKind::Stream, 0)
            .is_err());

        let err = translate_engine_error(&engine, ErrorKind::Accept);
        assert_eq!(err.kind(), ErrorKind::Accept);
        assert_eq!(err.native_code(), Some(ErrorCode::Resource));
    }

    #[test]
    fn test_host_exception() {
        let host = HostError::new("expected int, got str").with_traceback("line 1");
        let err = translate_host_exception(&host);
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.code(), 0);
        assert!(err.message().contains("expected int, got str"));
        assert_eq!(err.extra(), "line 1");

        let bare: UdtError = HostError::default().into();
        assert!(bare.message().contains("unrenderable"));
        assert_eq!(bare.extra(), "");
    }
}
