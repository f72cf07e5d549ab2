//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGUSR1 immediate sync.
//!
//! Uses the `signal-hook` crate for safe signal registration. The scheduler
//! polls `SignalHandler` flags between ticks and while sleeping rather than
//! blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe stop/sync flags shared between signal handlers, embedders and the scheduler.
///
/// All flags use `Ordering::Relaxed`: the scheduler polls them in short slices
/// and exact ordering with other memory is not required.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    sync_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// SIGTERM/SIGINT -> shutdown, SIGUSR1 -> sync now (Unix only).
    /// Registration is best-effort; failures are reported on stderr but not fatal.
    /// Without the `daemon` feature this is the same as [`detached`](Self::detached).
    pub fn new() -> Self {
        let handler = Self::detached();
        #[cfg(feature = "daemon")]
        handler.register_signals();
        handler
    }

    /// Handler with no OS hooks; only programmatic requests set its flags.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate sync has been requested.
    pub fn should_sync(&self) -> bool {
        self.sync_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_sync(&self) {
        self.sync_flag.store(true, Ordering::Relaxed);
    }

    #[cfg(feature = "daemon")]
    fn register_signals(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[RSY-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[RSY-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.sync_flag)) {
                eprintln!("[RSY-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}
