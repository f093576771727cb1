// ============================================
// File: crates/udtbind-common/src/time.rs
// ============================================
//! # Wait Timeouts
//!
//! ## Creation Reason
//! Multiplexer waits take a signed millisecond timeout whose sign carries
//! meaning. This module turns that integer into an explicit type once, at
//! the boundary, so engines never re-interpret raw integers.
//!
//! ## Main Functionality
//! - `WaitTimeout`: Infinite / Poll / bounded wait
//! - `Deadline`: Absolute point in time derived from a `WaitTimeout`
//!
//! ## Timeout Semantics
//! | Millis | Meaning |
//! |--------|---------|
//! | `< 0`  | Wait until an event happens |
//! | `0`    | Poll: report what is ready now and return |
//! | `> 0`  | Wait at most that many milliseconds |
//!
//! ## Last Modified
//! v0.1.0 - Initial timeout utilities

use std::time::{Duration, Instant};

// ============================================
// WaitTimeout
// ============================================

/// How long a blocking wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitTimeout {
    /// Block until at least one event happens.
    Infinite,
    /// Do not block at all.
    Poll,
    /// Block for at most this long.
    After(Duration),
}

impl WaitTimeout {
    /// Interprets a signed millisecond timeout.
    ///
    /// # Example
    /// ```
    /// use udtbind_common::time::WaitTimeout;
    /// use std::time::Duration;
    ///
    /// assert_eq!(WaitTimeout::from_millis(-1), WaitTimeout::Infinite);
    /// assert_eq!(WaitTimeout::from_millis(0), WaitTimeout::Poll);
    /// assert_eq!(
    ///     WaitTimeout::from_millis(250),
    ///     WaitTimeout::After(Duration::from_millis(250))
    /// );
    /// ```
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Self::Infinite,
            0 => Self::Poll,
            #[allow(clippy::cast_sign_loss)]
            ms => Self::After(Duration::from_millis(ms as u64)),
        }
    }

    /// Returns the signed millisecond form (`-1` for infinite).
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Infinite => -1,
            Self::Poll => 0,
            Self::After(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Returns `true` if this timeout never expires.
    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    /// Starts the clock for this timeout.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::start(*self)
    }
}

impl From<Option<Duration>> for WaitTimeout {
    fn from(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::Infinite,
            Some(d) if d.is_zero() => Self::Poll,
            Some(d) => Self::After(d),
        }
    }
}

// ============================================
// Deadline
// ============================================

/// Absolute expiry derived from a [`WaitTimeout`].
///
/// `None` inside means "never expires".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Starts a deadline now.
    #[must_use]
    pub fn start(timeout: WaitTimeout) -> Self {
        let now = Instant::now();
        let at = match timeout {
            WaitTimeout::Infinite => None,
            WaitTimeout::Poll => Some(now),
            WaitTimeout::After(d) => Some(now + d),
        };
        Self { at }
    }

    /// A deadline that never expires.
    #[must_use]
    pub const fn never() -> Self {
        Self { at: None }
    }

    /// Time left before expiry; `None` if the deadline never expires.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

// ============================================
// Tests
// ============================================
