// ============================================
// File: crates/udtbind/src/signals.rs
// ============================================
//! # Signal-triggered Shutdown
//!
//! ## Creation Reason
//! The engine may hold kernel resources that outlive a process killed
//! without cleanup. On SIGINT / SIGTERM the engine is cleaned up before the
//! process exits.
//!
//! ## Main Functionality
//! - `install_shutdown_handler()`: Watches for signals on a dedicated thread
//!
//! ## ⚠️ Important Note for Next Developer
//! - Installs at most once per process; the watcher cleans up whichever
//!   process-wide runtime is active when the signal arrives, so it keeps
//!   working across cleanup and a later startup
//! - The watcher thread owns a single-threaded tokio runtime; the binding
//!   itself stays synchronous
//! - The process exits with the signal number as status
//!
//! ## Last Modified
//! v0.1.0 - Initial signal handling

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{error, info, warn};

use crate::runtime;

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Cleans up the process-wide runtime and exits when SIGINT or SIGTERM
/// arrives.
///
/// Returns `Ok(false)` if a handler was already installed.
///
/// # Errors
/// Fails if the watcher runtime or thread cannot be created.
pub fn install_shutdown_handler() -> io::Result<bool> {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(false);
    }

    let watcher = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            INSTALLED.store(false, Ordering::Release);
            e
        })?;

    thread::Builder::new()
        .name("udtbind-signals".to_string())
        .spawn(move || {
            let signo = watcher.block_on(shutdown_signal());
            clean_up_active(signo);
            std::process::exit(signo);
        })
        .map_err(|e| {
            INSTALLED.store(false, Ordering::Release);
            e
        })?;

    Ok(true)
}

/// Tears down the runtime active at signal time, if any.
pub(crate) fn clean_up_active(signo: i32) {
    info!(signal = signo, "Shutdown signal received, cleaning up engine");
    if let Err(e) = runtime::cleanup() {
        error!(error = %e, "Engine cleanup failed during shutdown");
    }
}

/// Resolves with the number of the first shutdown signal received.
async fn shutdown_signal() -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Cannot watch SIGTERM, watching Ctrl+C only");
                return ctrl_c().await;
            }
        };
        tokio::select! {
            signo = ctrl_c() => signo,
            _ = sigterm.recv() => SIGTERM,
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> i32 {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot watch Ctrl+C");
        std::future::pending::<()>().await;
    }
    SIGINT
}
