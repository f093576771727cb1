// ============================================
// File: crates/udtbind-common/src/lib.rs
// ============================================
//! # udtbind Common - Shared Value Types
//!
//! ## Creation Reason
//! Provides the value types shared by the native engine boundary and the
//! binding layer, so both sides agree on descriptors, addresses, readiness
//! sets and wait semantics without depending on each other.
//!
//! ## Main Functionality
//! - [`types`]: Descriptor newtypes, address family / socket kind, endpoints,
//!   socket status, interest masks and readiness sets
//! - [`time`]: Wait timeout semantics and deadlines
//! - [`error`]: Common error type and result alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              udtbind-cli                            │
//! │                    │                                │
//! │                    ▼                                │
//! │               udtbind  (bridge, handles, epoll)     │
//! │                    │                                │
//! │                    ▼                                │
//! │             udtbind-engine (native boundary)        │
//! │                    │                                │
//! │                    ▼                                │
//! │             udtbind-common  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal (no logging, no runtime)
//! - Descriptor newtypes are plain integers owned by the engine; holding one
//!   does not keep the native socket alive
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use time::{Deadline, WaitTimeout};
pub use types::{
    AddressFamily, Endpoint, EpollId, EventMask, ReadySets, SocketKind, SocketStatus,
    SysSocketId, UdtSocketId, WaitInterest,
};
