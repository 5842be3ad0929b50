//! Shutdown token and OS signal installation.
//!
//! Handlers only store into atomics. Logging the received signal is left to
//! the event loop once it observes the token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(feature = "daemon")]
use crate::core::errors::{CheckError, Result};

/// Signals that request a graceful stop.
#[cfg(feature = "daemon")]
pub const STOP_SIGNALS: [i32; 5] = [
    signal_hook::consts::SIGINT,
    signal_hook::consts::SIGUSR1,
    signal_hook::consts::SIGHUP,
    signal_hook::consts::SIGTERM,
    signal_hook::consts::SIGQUIT,
];

/// Process-wide stop flag. Starts clear; once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    stop: Arc<AtomicBool>,
    last_signal: Arc<AtomicUsize>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the stop signals against this token.
    #[cfg(feature = "daemon")]
    pub fn install_handlers(&self) -> Result<()> {
        for signal in STOP_SIGNALS {
            let value = usize::try_from(signal).unwrap_or_default();
            signal_hook::flag::register_usize(signal, Arc::clone(&self.last_signal), value)
                .and_then(|_| signal_hook::flag::register(signal, Arc::clone(&self.stop)))
                .map_err(|e| CheckError::Runtime {
                    details: format!("failed to install handler for signal {signal}: {e}"),
                })?;
        }
        Ok(())
    }

    /// Request a stop without a signal.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Number of the signal that triggered the stop, if one did.
    #[must_use]
    pub fn received_signal(&self) -> Option<i32> {
        match self.last_signal.load(Ordering::SeqCst) {
            0 => None,
            n => i32::try_from(n).ok(),
        }
    }
}

/// Human-readable signal name, e.g. `SIGTERM`.
#[must_use]
pub fn signal_name(signal: i32) -> String {
    #[cfg(unix)]
    {
        nix::sys::signal::Signal::try_from(signal)
            .map_or_else(|_| format!("signal {signal}"), |s| s.as_str().to_string())
    }
    #[cfg(not(unix))]
    {
        format!("signal {signal}")
    }
}
