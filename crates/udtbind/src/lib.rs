// ============================================
// File: crates/udtbind/src/lib.rs
// ============================================
//! # udtbind - Binding Layer
//!
//! ## Creation Reason
//! Exposes a reliable UDP transport engine as owned socket handles and an
//! epoll-style multiplexer, for callers that live inside a managed host
//! runtime with a global execution lock.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`socket`]: `SocketHandle`, one native descriptor per handle
//! - [`epoll`]: `EventMultiplexer`, readiness over transport + system sockets
//! - [`bridge`]: Engine and host faults -> `UdtError`
//! - [`runtime`]: Engine startup/cleanup and the execution-lock bracket
//! - [`config`]: TOML configuration
//! - [`logging`]: Tracing subscriber setup
//! - [`signals`]: Cleanup on SIGINT / SIGTERM
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  udtbind-cli                        │
//! │                       │                             │
//! │                       ▼                             │
//! │                   udtbind  ◄── You are here         │
//! │      SocketHandle   EventMultiplexer   Runtime      │
//! │                       │                             │
//! │                       ▼                             │
//! │                udtbind-engine                       │
//! │                       │                             │
//! │                       ▼                             │
//! │                udtbind-common                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use udtbind::{EventMultiplexer, Runtime, SocketHandle};
//! use udtbind_engine::LoopbackEngine;
//!
//! let runtime = Runtime::new(Arc::new(LoopbackEngine::new()));
//! runtime.startup().unwrap();
//!
//! let server = SocketHandle::new(&runtime).unwrap();
//! server.bind("127.0.0.1", 9000).unwrap();
//! server.listen_default().unwrap();
//!
//! let client = Arc::new(SocketHandle::new(&runtime).unwrap());
//! client.connect("127.0.0.1", 9000).unwrap();
//! let (conn, _peer) = server.accept().unwrap();
//!
//! let poller = EventMultiplexer::create(&runtime).unwrap();
//! poller.add_transport(&client, Some(udtbind::EventMask::IN)).unwrap();
//! conn.send(b"hello").unwrap();
//! assert_eq!(poller.wait(-1).unwrap(), 1);
//! assert_eq!(client.recv(16).unwrap(), b"hello");
//!
//! runtime.cleanup().unwrap();
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every native failure goes through `bridge`; do not read the engine's
//!   last error anywhere else
//! - Blocking calls (accept, send, recv, wait) must use
//!   `Runtime::allow_threads`
//!
//! ## Last Modified
//! v0.1.0 - Initial binding layer

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod config;
pub mod epoll;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod signals;
pub mod socket;

// Re-export primary types
pub use bridge::{translate_engine_error, translate_host_exception, HostError};
pub use config::BindingConfig;
pub use epoll::EventMultiplexer;
pub use error::{ErrorKind, Result, UdtError};
pub use runtime::{cleanup, startup, startup_with, ExecutionLock, InterpreterLock, Runtime};
pub use socket::SocketHandle;

pub use udtbind_common::time::WaitTimeout;
pub use udtbind_common::types::{
    AddressFamily, Endpoint, EventMask, SocketKind, SocketStatus, SysSocketId, UdtSocketId,
    WaitInterest,
};

/// Readable event.
pub const UDT_EPOLL_IN: EventMask = EventMask::IN;
/// Writable event.
pub const UDT_EPOLL_OUT: EventMask = EventMask::OUT;
/// Error event.
pub const UDT_EPOLL_ERR: EventMask = EventMask::ERR;
