// ============================================
// File: crates/udtbind-engine/src/lib.rs
// ============================================
//! # udtbind Engine - Native Engine Boundary
//!
//! ## Creation Reason
//! Isolates the fixed native API of the reliable transport engine behind a
//! trait, together with its error table, so the binding layer never talks to
//! a concrete engine directly.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: The `Engine` trait
//! - [`error`]: Native error codes and the last-error record
//! - [`loopback`]: In-process engine for tests and demos
//! - [`sys`]: System socket helpers (local address, readiness)
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              udtbind                                │
//! │                    │                                │
//! │                    ▼                                │
//! │             udtbind-engine  ◄── You are here        │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   native library        LoopbackEngine              │
//! │                    │                                │
//! │                    ▼                                │
//! │             udtbind-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Platform Support
//! | Platform | Transport sockets | System sockets in epoll |
//! |----------|-------------------|-------------------------|
//! | Linux | ✅ | ✅ |
//! | macOS | ✅ | ✅ |
//! | Windows | ✅ | ❌ |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through the `Engine` trait, tests depend on swapping engines
//! - Failures carry no payload; the last-error record must be read and
//!   cleared by the caller on the failing thread
//!
//! ## Last Modified
//! v0.1.0 - Initial engine boundary

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod loopback;
pub mod sys;
pub mod traits;

// Re-export primary types
pub use error::{CallFailed, EngineFault, ErrorCode, NativeResult};
pub use loopback::{EngineCall, LoopbackEngine, Op};
pub use traits::Engine;
