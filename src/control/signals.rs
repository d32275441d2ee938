// src/control/signals.rs

//! Termination signals while stdin is in raw key mode.
//!
//! With `ISIG` off, Ctrl+C arrives as a key, but `kill`, a closed terminal
//! or a supervisor can still send SIGINT, SIGTERM or SIGHUP. Their default
//! action would end the process with the terminal left raw, so while a
//! [`SignalGuard`] is alive they only raise a flag that the control
//! listener turns into an orderly exit.

use anyhow::{Context, Result};
use log::{debug, warn};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Signals that would otherwise terminate the process.
pub const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

extern "C" fn record_signal(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Set once any guarded signal has been delivered.
pub fn interrupted_flag() -> &'static AtomicBool {
    &INTERRUPTED
}

/// Holds the recording handler in place; the previous handlers come back
/// on drop.
pub struct SignalGuard {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalGuard {
    pub fn install() -> Result<Self> {
        Self::install_for(&TERMINATION_SIGNALS)
    }

    pub fn install_for(signals: &[Signal]) -> Result<Self> {
        // No SA_RESTART: a blocked poll on the listener thread wakes with EINTR.
        let action = SigAction::new(SigHandler::Handler(record_signal), SaFlags::empty(), SigSet::empty());
        let mut guard = SignalGuard {
            previous: Vec::with_capacity(signals.len()),
        };
        for &signal in signals {
            // The handler only stores to an atomic, which is async-signal-safe.
            let previous = unsafe { sigaction(signal, &action) }
                .with_context(|| format!("Failed to install a handler for {}", signal))?;
            guard.previous.push((signal, previous));
        }
        debug!("SignalGuard: recording {:?}", signals);
        Ok(guard)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for (signal, previous) in self.previous.drain(..).rev() {
            if let Err(e) = unsafe { sigaction(signal, &previous) } {
                warn!("SignalGuard: failed to restore the handler for {}: {}", signal, e);
            }
        }
    }
}
