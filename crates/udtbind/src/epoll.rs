// ============================================
// File: crates/udtbind/src/epoll.rs
// ============================================
//! # Event Multiplexer
//!
//! ## Creation Reason
//! Waits for readiness across transport sockets and plain system sockets
//! with one blocking call, and sweeps out transport handles whose native
//! connection has died.
//!
//! ## Main Functionality
//! - `EventMultiplexer::create()`: Allocates a native epoll context
//! - add / remove for transport handles and system descriptors
//! - `wait()` / `wait_with()`: Blocking wait filling four readiness sets
//! - `garbage_collect()`: Drops associations with dead sockets
//!
//! ## Main Logical Flow
//! ```text
//! add_transport(handle) ──► native add ──► tracked[desc] = Weak(handle)
//!
//! wait(timeout)
//!   ├── [gc_on_wait] garbage_collect()
//!   ├── lock released ── native wait ── lock reacquired
//!   ├── ETIMEOUT      → 0, sets empty
//!   └── other failure → Wait error, sets empty
//!
//! garbage_collect()
//!   1. collect victims (handle gone, or status Broken/Closed/NonExistent)
//!   2. erase them from `tracked`
//!   3. native remove, failures tolerated
//!   4. close victims the multiplexer may release
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The tracking map holds `Weak` references; the caller owns handles
//! - Removing something not registered here is a no-op, no native call
//! - Registering one handle with two multiplexers is allowed by the
//!   engine; both will sweep it, and that is the caller's problem
//! - Dropping a handle does not untrack it; the next sweep does
//!
//! ## Last Modified
//! v0.1.0 - Initial multiplexer

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use udtbind_common::time::WaitTimeout;
use udtbind_common::types::{EpollId, EventMask, ReadySets, SysSocketId, UdtSocketId, WaitInterest};
use udtbind_engine::error::ErrorCode;

use crate::bridge::{fault_error, take_fault, translate_engine_error};
use crate::error::{ErrorKind, Result, UdtError};
use crate::runtime::Runtime;
use crate::socket::SocketHandle;

// ============================================
// EventMultiplexer
// ============================================

/// Readiness multiplexer over transport and system sockets.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use udtbind::{EventMultiplexer, Runtime};
/// use udtbind_engine::LoopbackEngine;
///
/// let runtime = Runtime::new(Arc::new(LoopbackEngine::new()));
/// let poller = EventMultiplexer::create(&runtime).unwrap();
/// assert_eq!(poller.wait(0).unwrap(), 0);
/// ```
pub struct EventMultiplexer {
    runtime: Arc<Runtime>,
    id: EpollId,
    tracked: Mutex<BTreeMap<UdtSocketId, Weak<SocketHandle>>>,
    system: Mutex<BTreeSet<SysSocketId>>,
    ready: Mutex<ReadySets>,
    released: AtomicBool,
}

impl EventMultiplexer {
    /// Allocates a native epoll context.
    ///
    /// # Errors
    /// Returns an `Engine` error if the engine refuses.
    pub fn create(runtime: &Arc<Runtime>) -> Result<Self> {
        let engine = runtime.engine();
        let Ok(id) = engine.epoll_create() else {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        };
        debug!(eid = %id, "Multiplexer created");

        Ok(Self {
            runtime: Arc::clone(runtime),
            id,
            tracked: Mutex::new(BTreeMap::new()),
            system: Mutex::new(BTreeSet::new()),
            ready: Mutex::new(ReadySets::default()),
            released: AtomicBool::new(false),
        })
    }

    /// Native epoll id.
    #[must_use]
    pub const fn id(&self) -> EpollId {
        self.id
    }

    // ========================================
    // Registration
    // ========================================

    /// Registers a transport handle; `None` means every event.
    ///
    /// Registering the same descriptor again replaces its mask.
    ///
    /// # Errors
    /// `Engine` on native failure; the handle is not tracked then.
    pub fn add_transport(&self, handle: &Arc<SocketHandle>, events: Option<EventMask>) -> Result<()> {
        self.ensure_live("add")?;
        let sock = handle.descriptor();

        let engine = self.runtime.engine();
        if engine.epoll_add_usock(self.id, sock, events).is_err() {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        }
        self.tracked.lock().insert(sock, Arc::downgrade(handle));
        trace!(eid = %self.id, sock = %sock, "Transport socket registered");
        Ok(())
    }

    /// Unregisters a transport handle; untracked handles are ignored.
    ///
    /// # Errors
    /// `Engine` if the native removal fails. The handle is untracked
    /// regardless.
    pub fn remove_transport(&self, handle: &SocketHandle) -> Result<()> {
        self.remove_transport_id(handle.descriptor())
    }

    /// Unregisters a transport descriptor; untracked ones are ignored.
    ///
    /// # Errors
    /// See [`EventMultiplexer::remove_transport`].
    pub fn remove_transport_id(&self, sock: UdtSocketId) -> Result<()> {
        self.ensure_live("remove")?;
        if self.tracked.lock().remove(&sock).is_none() {
            trace!(eid = %self.id, sock = %sock, "Remove of untracked socket ignored");
            return Ok(());
        }

        let engine = self.runtime.engine();
        if engine.epoll_remove_usock(self.id, sock).is_err() {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        }
        trace!(eid = %self.id, sock = %sock, "Transport socket unregistered");
        Ok(())
    }

    /// Registers a system socket; `None` means every event.
    ///
    /// # Errors
    /// `Engine` on native failure.
    pub fn add_system(&self, sys: SysSocketId, events: Option<EventMask>) -> Result<()> {
        self.ensure_live("add")?;

        let engine = self.runtime.engine();
        if engine.epoll_add_ssock(self.id, sys, events).is_err() {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        }
        self.system.lock().insert(sys);
        trace!(eid = %self.id, sys = %sys, "System socket registered");
        Ok(())
    }

    /// Unregisters a system socket; unknown descriptors are ignored.
    ///
    /// # Errors
    /// `Engine` if the native removal fails.
    pub fn remove_system(&self, sys: SysSocketId) -> Result<()> {
        self.ensure_live("remove")?;
        if !self.system.lock().remove(&sys) {
            return Ok(());
        }

        let engine = self.runtime.engine();
        if engine.epoll_remove_ssock(self.id, sys).is_err() {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        }
        Ok(())
    }

    /// Descriptors currently tracked, in ascending order.
    #[must_use]
    pub fn tracked(&self) -> Vec<UdtSocketId> {
        self.tracked.lock().keys().copied().collect()
    }

    /// The handle tracked under `sock`, if it is still alive.
    #[must_use]
    pub fn handle_for(&self, sock: UdtSocketId) -> Option<Arc<SocketHandle>> {
        self.tracked.lock().get(&sock).and_then(Weak::upgrade)
    }

    // ========================================
    // Waiting
    // ========================================

    /// Waits for transport readiness.
    ///
    /// Negative `timeout_ms` waits forever, zero polls.
    ///
    /// # Errors
    /// See [`EventMultiplexer::wait_with`].
    pub fn wait(&self, timeout_ms: i64) -> Result<usize> {
        self.wait_with(timeout_ms, WaitInterest::default())
    }

    /// Waits for readiness in the requested categories.
    ///
    /// Returns the number of ready entries; `0` on timeout. The readiness
    /// sets are replaced in full, and categories not requested come back
    /// empty.
    ///
    /// # Errors
    /// `Wait` on any native failure other than a timeout.
    pub fn wait_with(&self, timeout_ms: i64, interest: WaitInterest) -> Result<usize> {
        self.ensure_live("wait")?;
        if self.runtime.config().multiplexer.gc_on_wait {
            self.garbage_collect()?;
        }

        let id = self.id;
        let timeout = WaitTimeout::from_millis(timeout_ms);
        let mut sets = ReadySets::default();
        let waited = self
            .runtime
            .allow_threads(|engine| engine.epoll_wait(id, interest, timeout, &mut sets));

        let result = match waited {
            Ok(total) => Ok(total),
            Err(_) => {
                let fault = take_fault(self.runtime.engine());
                sets.clear();
                if fault.code == ErrorCode::Timeout {
                    Ok(0)
                } else {
                    Err(fault_error(&fault, ErrorKind::Wait))
                }
            }
        };

        Self::drop_unrequested(&mut sets, interest);
        *self.ready.lock() = sets;
        result
    }

    fn drop_unrequested(sets: &mut ReadySets, interest: WaitInterest) {
        if !interest.transport_read {
            sets.transport_read.clear();
        }
        if !interest.transport_write {
            sets.transport_write.clear();
        }
        if !interest.system_read {
            sets.system_read.clear();
        }
        if !interest.system_write {
            sets.system_write.clear();
        }
    }

    /// Readable transport sockets from the last wait.
    #[must_use]
    pub fn ready_transport_read(&self) -> BTreeSet<UdtSocketId> {
        self.ready.lock().transport_read.clone()
    }

    /// Writable transport sockets from the last wait.
    #[must_use]
    pub fn ready_transport_write(&self) -> BTreeSet<UdtSocketId> {
        self.ready.lock().transport_write.clone()
    }

    /// Readable system sockets from the last wait.
    #[must_use]
    pub fn ready_system_read(&self) -> BTreeSet<SysSocketId> {
        self.ready.lock().system_read.clone()
    }

    /// Writable system sockets from the last wait.
    #[must_use]
    pub fn ready_system_write(&self) -> BTreeSet<SysSocketId> {
        self.ready.lock().system_write.clone()
    }

    // ========================================
    // Garbage Collection
    // ========================================

    /// Untracks every handle that is gone or whose socket is dead.
    ///
    /// Victims are unregistered from the engine (failures ignored) and
    /// closed if they own their descriptor. Returns how many were swept.
    ///
    /// # Errors
    /// `ClosedHandle` if the multiplexer was released.
    pub fn garbage_collect(&self) -> Result<usize> {
        self.ensure_live("garbage collect")?;
        let engine = self.runtime.engine();

        let victims: Vec<(UdtSocketId, Option<Arc<SocketHandle>>)> = {
            let tracked = self.tracked.lock();
            tracked
                .iter()
                .filter_map(|(&sock, weak)| match weak.upgrade() {
                    None => Some((sock, None)),
                    Some(handle) if engine.status(sock).is_dead() => Some((sock, Some(handle))),
                    Some(_) => None,
                })
                .collect()
        };
        if victims.is_empty() {
            return Ok(0);
        }

        {
            let mut tracked = self.tracked.lock();
            for (sock, _) in &victims {
                tracked.remove(sock);
            }
        }

        for (sock, handle) in &victims {
            if engine.epoll_remove_usock(self.id, *sock).is_err() {
                let fault = take_fault(engine);
                trace!(sock = %sock, code = fault.code.code(), "Native remove of dead socket failed");
            }
            let Some(handle) = handle else {
                continue;
            };
            if handle.close_on_release() {
                if let Err(e) = handle.close() {
                    warn!(sock = %sock, error = %e, "Closing dead socket failed");
                }
            }
        }

        debug!(eid = %self.id, swept = victims.len(), "Garbage collection done");
        Ok(victims.len())
    }

    // ========================================
    // Release
    // ========================================

    /// Releases the native context; later calls do nothing.
    ///
    /// # Errors
    /// `Engine` if the native release fails.
    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tracked.lock().clear();
        self.system.lock().clear();
        self.ready.lock().clear();

        let engine = self.runtime.engine();
        if engine.epoll_release(self.id).is_err() {
            return Err(translate_engine_error(engine, ErrorKind::Engine));
        }
        debug!(eid = %self.id, "Multiplexer released");
        Ok(())
    }

    /// Returns `true` once `release()` has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_live(&self, operation: &str) -> Result<()> {
        if self.is_released() {
            return Err(UdtError::local(
                ErrorKind::ClosedHandle,
                ErrorCode::InvalidPollId.code(),
                format!("{operation} on a released multiplexer"),
            ));
        }
        Ok(())
    }
}

impl Drop for EventMultiplexer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(eid = %self.id, error = %e, "Multiplexer release failed");
        }
    }
}

impl fmt::Debug for EventMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMultiplexer")
            .field("id", &self.id)
            .field("tracked", &self.tracked.lock().len())
            .field("system", &self.system.lock().len())
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::{Duration, Instant};

    use udtbind_common::types::SocketStatus;
    use udtbind_engine::{EngineCall, LoopbackEngine, Op};

    use crate::config::BindingConfig;

    fn setup() -> (Arc<LoopbackEngine>, Arc<Runtime>) {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = Runtime::new(engine.clone());
        (engine, runtime)
    }

    /// Client and accepted server side on `port`.
    fn pair(runtime: &Arc<Runtime>, port: u16) -> (Arc<SocketHandle>, Arc<SocketHandle>) {
        let server = SocketHandle::new(runtime).unwrap();
        server.bind("127.0.0.1", port).unwrap();
        server.listen(1).unwrap();
        let client = SocketHandle::new(runtime).unwrap();
        client.connect("127.0.0.1", port).unwrap();
        let (accepted, _) = server.accept().unwrap();
        (Arc::new(client), Arc::new(accepted))
    }

    #[test]
    fn test_poll_empty_returns_zero() {
        let (_, runtime) = setup();
        let poller = EventMultiplexer::create(&runtime).unwrap();

        let started = Instant::now();
        assert_eq!(poller.wait(0).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(poller.ready_transport_read().is_empty());
    }

    #[test]
    fn test_create_failure() {
        let (engine, runtime) = setup();
        engine.fail_next(Op::EpollCreate, ErrorCode::Resource);
        let err = EventMultiplexer::create(&runtime).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
    }

    #[test]
    fn test_readable_after_send() {
        let (_, runtime) = setup();
        let (client, server) = pair(&runtime, 7200);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.add_transport(&server, Some(EventMask::IN)).unwrap();

        assert_eq!(poller.wait(0).unwrap(), 0);
        client.send(b"ping").unwrap();

        assert_eq!(poller.wait(100).unwrap(), 1);
        assert!(poller.ready_transport_read().contains(&server.descriptor()));
        assert!(poller.ready_transport_write().is_empty());
    }

    #[test]
    fn test_unrequested_sets_stay_empty() {
        let (_, runtime) = setup();
        let (client, server) = pair(&runtime, 7201);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.add_transport(&server, None).unwrap();
        client.send(b"x").unwrap();

        let interest = WaitInterest::none().transport_write(true);
        assert_eq!(poller.wait_with(0, interest).unwrap(), 1);
        assert!(poller.ready_transport_read().is_empty());
        assert!(poller.ready_transport_write().contains(&server.descriptor()));
    }

    #[test]
    fn test_wait_failure_is_wait_error() {
        let (_, runtime) = setup();
        let poller = EventMultiplexer::create(&runtime).unwrap();

        let err = poller.wait(-1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wait);
        assert_eq!(err.native_code(), Some(ErrorCode::InvalidParam));
    }

    #[test]
    fn test_remove_untracked_is_noop() {
        let (engine, runtime) = setup();
        let (client, _server) = pair(&runtime, 7202);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        engine.clear_calls();

        poller.remove_transport(&client).unwrap();
        poller.remove_system(SysSocketId::new(3)).unwrap();
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_add_remove_transport() {
        let (engine, runtime) = setup();
        let (client, _server) = pair(&runtime, 7203);
        let poller = EventMultiplexer::create(&runtime).unwrap();

        poller.add_transport(&client, None).unwrap();
        assert_eq!(poller.tracked(), vec![client.descriptor()]);
        assert!(poller.handle_for(client.descriptor()).is_some());

        poller.remove_transport(&client).unwrap();
        assert!(poller.tracked().is_empty());
        assert!(engine
            .calls()
            .contains(&EngineCall::EpollRemoveUsock(poller.id(), client.descriptor())));
    }

    #[test]
    fn test_add_failure_not_tracked() {
        let (engine, runtime) = setup();
        let sock = Arc::new(SocketHandle::new(&runtime).unwrap());
        let poller = EventMultiplexer::create(&runtime).unwrap();

        engine.fail_next(Op::EpollAdd, ErrorCode::InvalidSock);
        let err = poller.add_transport(&sock, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(poller.tracked().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_socket_readiness() {
        let (_, runtime) = setup();
        let poller = EventMultiplexer::create(&runtime).unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sys = SysSocketId::from(&receiver);

        poller.add_system(sys, Some(EventMask::IN)).unwrap();
        let interest = WaitInterest::none().system_read(true);
        assert_eq!(poller.wait_with(0, interest).unwrap(), 0);

        sender.send_to(b"hi", receiver.local_addr().unwrap()).unwrap();
        assert_eq!(poller.wait_with(1000, interest).unwrap(), 1);
        assert!(poller.ready_system_read().contains(&sys));

        poller.remove_system(sys).unwrap();
        assert_eq!(poller.wait_with(0, interest).unwrap(), 0);
    }

    #[test]
    fn test_gc_sweeps_dead_socket_once() {
        let (engine, runtime) = setup();
        let (client, _server) = pair(&runtime, 7204);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.add_transport(&client, None).unwrap();

        engine.force_status(client.descriptor(), SocketStatus::Closed);
        assert_eq!(poller.garbage_collect().unwrap(), 1);

        assert!(poller.tracked().is_empty());
        assert!(client.is_closed());
        let raw = client.descriptor();
        drop(client);
        assert_eq!(engine.close_count(raw), 1);

        assert_eq!(poller.garbage_collect().unwrap(), 0);
    }

    #[test]
    fn test_gc_respects_borrowed_descriptor() {
        let (engine, runtime) = setup();
        let (client, _server) = pair(&runtime, 7205);
        client.set_close_on_release(false);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.add_transport(&client, None).unwrap();

        engine.force_status(client.descriptor(), SocketStatus::Broken);
        assert_eq!(poller.garbage_collect().unwrap(), 1);
        assert_eq!(engine.close_count(client.descriptor()), 0);
    }

    #[test]
    fn test_gc_sweeps_dropped_handle() {
        let (engine, runtime) = setup();
        let (client, _server) = pair(&runtime, 7206);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.add_transport(&client, None).unwrap();
        let raw = client.descriptor();

        drop(client);
        assert!(poller.handle_for(raw).is_none());
        assert_eq!(poller.garbage_collect().unwrap(), 1);
        assert!(poller.tracked().is_empty());
        assert_eq!(engine.close_count(raw), 1);
    }

    #[test]
    fn test_gc_on_wait() {
        let engine = Arc::new(LoopbackEngine::new());
        let mut config = BindingConfig::default();
        config.multiplexer.gc_on_wait = true;
        let runtime = Runtime::with_config(engine.clone(), config);

        let (client, server) = pair(&runtime, 7207);
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.add_transport(&client, Some(EventMask::IN)).unwrap();
        poller.add_transport(&server, Some(EventMask::IN)).unwrap();

        engine.force_status(client.descriptor(), SocketStatus::NonExistent);
        assert_eq!(poller.wait(0).unwrap(), 0);
        assert_eq!(poller.tracked(), vec![server.descriptor()]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (engine, runtime) = setup();
        let poller = EventMultiplexer::create(&runtime).unwrap();
        poller.release().unwrap();
        poller.release().unwrap();
        assert_eq!(engine.open_epolls(), 0);

        let err = poller.wait(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClosedHandle);
        assert!(!err.is_engine_error());
        drop(poller);

        let releases = engine
            .calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::EpollRelease(_)))
            .count();
        assert_eq!(releases, 1);
    }
}
