// ============================================
// File: crates/udtbind-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Provides the error type for value-level failures (parsing endpoints,
//! resolving hosts) that happen before any native call.
//!
//! ## Main Functionality
//! - `CommonError`: Base error enum for value operations
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - The binding layer turns every `CommonError` into an argument failure;
//!   keep messages readable, they end up in front of the caller
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Common error types shared across udtbind crates.
///
/// # Example
/// ```
/// use udtbind_common::error::CommonError;
///
/// let err = CommonError::invalid_address("nowhere:99", "unknown host");
/// assert_eq!(err.to_string(), "Invalid address 'nowhere:99': unknown host");
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    /// Address could not be parsed or resolved.
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The address as given by the caller
        addr: String,
        /// Why it was rejected
        reason: String,
    },
}

impl CommonError {
    /// Creates an `InvalidAddress` error.
    pub fn invalid_address(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            addr: addr.into(),
            reason: reason.into(),
        }
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
        let err = CommonError::invalid_address("nowhere:99", "unknown host");
        assert!(err.to_string().contains("nowhere:99"));
        assert!(err.to_string().contains("unknown host"));
    }
}
