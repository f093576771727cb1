// ============================================
// File: crates/udtbind/src/runtime.rs
// ============================================
//! # Runtime Bridge
//!
//! ## Creation Reason
//! Two process-wide concerns sit between the host runtime and the engine:
//! the engine's one-time startup/cleanup, and the host's global execution
//! lock, which must not be held while a native call blocks.
//!
//! ## Main Functionality
//! - `Runtime`: Engine + execution lock + configuration, shared by handles
//! - `ExecutionLock`: Seam for the host's global lock
//! - `InterpreterLock`: Reentrant global lock for hosts without their own
//! - `LockReleaseGuard`: Releases the lock, reacquires it on drop
//! - `startup()` / `cleanup()` / `global()`: Process-wide singleton
//!
//! ## Main Logical Flow
//! 1. `startup(engine)` starts the engine and publishes the runtime
//! 2. Handles call `allow_threads` around accept/send/recv/wait
//! 3. The lock is reacquired before any failure is translated
//! 4. `cleanup()` tears the engine down after handles are gone
//!
//! ## ⚠️ Important Note for Next Developer
//! - Repeated `startup()` returns the active runtime; `cleanup()` with
//!   nothing active does nothing
//! - Cleanup order is the caller's job: handles used after cleanup see
//!   invalid-socket failures, which `close()` swallows
//! - Never translate an engine error inside the `allow_threads` closure
//!
//! ## Last Modified
//! v0.1.0 - Initial runtime bridge

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{const_mutex, Condvar, Mutex};
use tracing::{debug, info, warn};

use udtbind_engine::Engine;

use crate::bridge::translate_engine_error;
use crate::config::BindingConfig;
use crate::error::{ErrorKind, Result};
use crate::signals;

// ============================================
// ExecutionLock
// ============================================

/// The host runtime's global execution lock.
///
/// `release` gives up every level the calling thread holds and reports how
/// many; `reacquire` restores exactly that many. A thread that does not
/// hold the lock releases `0` levels and reacquires nothing.
pub trait ExecutionLock: Send + Sync {
    /// Releases the lock held by the calling thread.
    fn release(&self) -> usize;

    /// Reacquires `depth` levels for the calling thread, blocking as needed.
    fn reacquire(&self, depth: usize);
}

/// Lock for hosts that run without a global execution lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExecutionLock;

impl ExecutionLock for NoExecutionLock {
    fn release(&self) -> usize {
        0
    }

    fn reacquire(&self, _depth: usize) {}
}

// ============================================
// InterpreterLock
// ============================================

/// Reentrant global lock: one thread runs host code at a time.
///
/// # Example
/// ```
/// use udtbind::runtime::InterpreterLock;
///
/// let lock = InterpreterLock::new();
/// {
///     let _outer = lock.enter();
///     let _inner = lock.enter();
///     assert!(lock.is_held());
/// }
/// assert!(!lock.is_held());
/// ```
#[derive(Debug, Default)]
pub struct InterpreterLock {
    /// Owning thread and nesting depth
    owner: Mutex<Option<(ThreadId, usize)>>,
    /// Signalled when the lock becomes free
    freed: Condvar,
}

impl InterpreterLock {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires one level for the calling thread.
    pub fn enter(&self) -> InterpreterGuard<'_> {
        self.acquire(1);
        InterpreterGuard { lock: self }
    }

    /// Returns `true` if the calling thread holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        let me = thread::current().id();
        matches!(*self.owner.lock(), Some((owner, _)) if owner == me)
    }

    /// Returns `true` if any thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    fn acquire(&self, levels: usize) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            let current = *owner;
            match current {
                None => {
                    *owner = Some((me, levels));
                    return;
                }
                Some((holder, depth)) if holder == me => {
                    *owner = Some((me, depth + levels));
                    return;
                }
                Some(_) => self.freed.wait(&mut owner),
            }
        }
    }

    fn leave(&self) {
        let mut owner = self.owner.lock();
        let current = *owner;
        if let Some((holder, depth)) = current {
            if depth > 1 {
                *owner = Some((holder, depth - 1));
            } else {
                *owner = None;
                drop(owner);
                self.freed.notify_one();
            }
        }
    }
}

impl ExecutionLock for InterpreterLock {
    fn release(&self) -> usize {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        let current = *owner;
        match current {
            Some((holder, depth)) if holder == me => {
                *owner = None;
                drop(owner);
                self.freed.notify_one();
                depth
            }
            _ => 0,
        }
    }

    fn reacquire(&self, depth: usize) {
        if depth > 0 {
            self.acquire(depth);
        }
    }
}

/// One level of [`InterpreterLock`], released on drop.
#[derive(Debug)]
pub struct InterpreterGuard<'a> {
    lock: &'a InterpreterLock,
}

impl Drop for InterpreterGuard<'_> {
    fn drop(&mut self) {
        self.lock.leave();
    }
}

// ============================================
// LockReleaseGuard
// ============================================

/// Releases an execution lock for its lifetime.
///
/// Reacquisition happens in `Drop`, so it runs on every exit path,
/// including unwinding out of a native call.
pub struct LockReleaseGuard<'a> {
    lock: &'a dyn ExecutionLock,
    depth: usize,
}

impl<'a> LockReleaseGuard<'a> {
    /// Releases `lock` for the calling thread.
    pub fn new(lock: &'a dyn ExecutionLock) -> Self {
        let depth = lock.release();
        Self { lock, depth }
    }

    /// Levels that will be reacquired.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for LockReleaseGuard<'_> {
    fn drop(&mut self) {
        self.lock.reacquire(self.depth);
    }
}

// ============================================
// Runtime
// ============================================

/// Engine, execution lock and configuration shared by handles.
///
/// # Thread Safety
/// `Runtime` is `Send + Sync` and shared as `Arc<Runtime>`; every handle
/// and multiplexer keeps one.
pub struct Runtime {
    /// The native engine
    engine: Arc<dyn Engine>,
    /// Host execution lock released around blocking calls
    lock: Arc<dyn ExecutionLock>,
    /// Binding configuration
    config: BindingConfig,
    /// Whether the engine is started; held across startup and cleanup
    started: Mutex<bool>,
}

impl Runtime {
    /// Creates a runtime with default configuration and no execution lock.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Arc<Self> {
        Self::with_config(engine, BindingConfig::default())
    }

    /// Creates a runtime with the given configuration.
    #[must_use]
    pub fn with_config(engine: Arc<dyn Engine>, config: BindingConfig) -> Arc<Self> {
        Self::with_lock(engine, config, Arc::new(NoExecutionLock))
    }

    /// Creates a runtime bound to a host execution lock.
    #[must_use]
    pub fn with_lock(
        engine: Arc<dyn Engine>,
        config: BindingConfig,
        lock: Arc<dyn ExecutionLock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            lock,
            config,
            started: Mutex::new(false),
        })
    }

    /// The native engine.
    #[must_use]
    pub fn engine(&self) -> &dyn Engine {
        &*self.engine
    }

    /// The binding configuration.
    #[must_use]
    pub const fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Returns `true` between `startup` and `cleanup`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    /// Starts the engine; a started runtime is left as is.
    ///
    /// # Errors
    /// Returns an `Engine` error if the engine fails to start.
    pub fn startup(&self) -> Result<()> {
        let mut started = self.started.lock();
        if *started {
            debug!("Engine already started");
            return Ok(());
        }

        if self.engine.startup().is_err() {
            return Err(translate_engine_error(self.engine(), ErrorKind::Engine));
        }

        *started = true;
        info!("Engine started");
        Ok(())
    }

    /// Tears the engine down; does nothing if it is not started.
    ///
    /// # Errors
    /// Returns an `Engine` error if teardown fails.
    pub fn cleanup(&self) -> Result<()> {
        let mut started = self.started.lock();
        if !std::mem::replace(&mut *started, false) {
            debug!("Engine not started, nothing to clean up");
            return Ok(());
        }

        if self.engine.cleanup().is_err() {
            return Err(translate_engine_error(self.engine(), ErrorKind::Engine));
        }

        info!("Engine cleaned up");
        Ok(())
    }

    /// Runs a blocking native call with the execution lock released.
    ///
    /// The lock is back in place when this returns, on every path.
    pub fn allow_threads<T>(&self, call: impl FnOnce(&dyn Engine) -> T) -> T {
        let _released = LockReleaseGuard::new(&*self.lock);
        call(&*self.engine)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("started", &self.is_started())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================
// Process-wide Singleton
// ============================================

static GLOBAL: Mutex<Option<Arc<Runtime>>> = const_mutex(None);

/// Starts `engine` as the process-wide runtime with default configuration.
///
/// # Errors
/// Returns an `Engine` error if the engine fails to start.
pub fn startup(engine: Arc<dyn Engine>) -> Result<Arc<Runtime>> {
    startup_with(engine, BindingConfig::default())
}

/// Starts `engine` as the process-wide runtime.
///
/// If a runtime is already active it is returned unchanged and `engine` is
/// not touched. Installs the shutdown signal handler when configured.
///
/// # Errors
/// Returns an `Engine` error if the engine fails to start.
pub fn startup_with(engine: Arc<dyn Engine>, config: BindingConfig) -> Result<Arc<Runtime>> {
    let mut global = GLOBAL.lock();
    if let Some(active) = global.as_ref() {
        debug!("Process-wide runtime already active");
        return Ok(Arc::clone(active));
    }

    let install_handlers = config.signals.install_handlers;
    let runtime = Runtime::with_config(engine, config);
    runtime.startup()?;
    *global = Some(Arc::clone(&runtime));
    drop(global);

    if install_handlers {
        if let Err(e) = signals::install_shutdown_handler() {
            warn!(error = %e, "Failed to install shutdown signal handler");
        }
    }
    Ok(runtime)
}

/// Tears down the process-wide runtime, if any.
///
/// # Errors
/// Returns an `Engine` error if teardown fails; the runtime is forgotten
/// either way.
pub fn cleanup() -> Result<()> {
    let active = GLOBAL.lock().take();
    match active {
        Some(runtime) => runtime.cleanup(),
        None => Ok(()),
    }
}

/// The process-wide runtime, if started.
#[must_use]
pub fn global() -> Option<Arc<Runtime>> {
    GLOBAL.lock().clone()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use udtbind_engine::error::ErrorCode;
    use udtbind_engine::{EngineCall, LoopbackEngine, Op};

    static GLOBAL_TESTS: Mutex<()> = const_mutex(());

    fn quiet_config() -> BindingConfig {
        let mut config = BindingConfig::default();
        config.signals.install_handlers = false;
        config
    }

    #[test]
    fn test_startup_cleanup_idempotent() {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = Runtime::new(engine.clone());

        runtime.startup().unwrap();
        runtime.startup().unwrap();
        assert!(runtime.is_started());

        runtime.cleanup().unwrap();
        runtime.cleanup().unwrap();
        assert!(!runtime.is_started());

        let calls = engine.calls();
        assert_eq!(calls.iter().filter(|c| **c == EngineCall::Startup).count(), 1);
        assert_eq!(calls.iter().filter(|c| **c == EngineCall::Cleanup).count(), 1);
    }

    #[test]
    fn test_concurrent_startup_sees_started_engine() {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = Runtime::new(engine.clone());

        let starters: Vec<_> = (0..8)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    runtime.startup().unwrap();
                    assert!(engine.is_started());
                })
            })
            .collect();
        for starter in starters {
            starter.join().unwrap();
        }

        let calls = engine.calls();
        assert_eq!(calls.iter().filter(|c| **c == EngineCall::Startup).count(), 1);
    }

    #[test]
    fn test_startup_failure() {
        let engine = Arc::new(LoopbackEngine::new());
        engine.fail_next(Op::Startup, ErrorCode::Resource);
        let runtime = Runtime::new(engine.clone());

        let err = runtime.startup().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(err.native_code(), Some(ErrorCode::Resource));
        assert!(!runtime.is_started());
        assert!(engine.last_error().is_none());

        runtime.startup().unwrap();
    }

    #[test]
    fn test_interpreter_lock_reentrant() {
        let lock = InterpreterLock::new();
        let outer = lock.enter();
        let inner = lock.enter();

        assert_eq!(lock.release(), 2);
        assert!(!lock.is_locked());
        lock.reacquire(2);
        assert!(lock.is_held());

        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_release_by_non_holder() {
        let lock = InterpreterLock::new();
        assert_eq!(lock.release(), 0);
        lock.reacquire(0);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_allow_threads_releases_lock() {
        let lock = Arc::new(InterpreterLock::new());
        let runtime = Runtime::with_lock(
            Arc::new(LoopbackEngine::new()),
            BindingConfig::default(),
            lock.clone(),
        );

        let _held = lock.enter();
        let (tx, rx) = mpsc::channel();

        runtime.allow_threads(|_| {
            // Another thread can take the lock while we are "blocked".
            let other = lock.clone();
            std::thread::spawn(move || {
                let _g = other.enter();
                tx.send(()).unwrap();
            })
            .join()
            .unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(lock.is_held());
    }

    #[test]
    fn test_allow_threads_reacquires_on_panic() {
        let lock = Arc::new(InterpreterLock::new());
        let runtime = Runtime::with_lock(
            Arc::new(LoopbackEngine::new()),
            BindingConfig::default(),
            lock.clone(),
        );

        let _held = lock.enter();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runtime.allow_threads(|_| panic!("native call blew up"));
        }));
        assert!(result.is_err());
        assert!(lock.is_held());
    }

    #[test]
    fn test_signal_cleanup_reaches_restarted_runtime() {
        let _serial = GLOBAL_TESTS.lock();
        cleanup().unwrap();

        let first = Arc::new(LoopbackEngine::new());
        startup_with(first.clone(), quiet_config()).unwrap();
        cleanup().unwrap();

        let second = Arc::new(LoopbackEngine::new());
        startup_with(second.clone(), quiet_config()).unwrap();
        signals::clean_up_active(15);

        assert!(!second.is_started());
        assert!(global().is_none());
    }

    #[test]
    fn test_global_singleton() {
        let _serial = GLOBAL_TESTS.lock();
        cleanup().unwrap();

        let engine = Arc::new(LoopbackEngine::new());
        let first = startup_with(engine.clone(), quiet_config()).unwrap();
        let second = startup_with(Arc::new(LoopbackEngine::new()), quiet_config()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(global().is_some());
        assert!(engine.is_started());

        cleanup().unwrap();
        cleanup().unwrap();
        assert!(global().is_none());
        assert!(!engine.is_started());
    }
}
