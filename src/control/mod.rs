// src/control/mod.rs

//! Interactive control of a running render.
//!
//! A dedicated listener thread pulls keypresses from a [`KeySource`],
//! decodes them into [`ControlCommand`]s and applies them to the shared
//! [`ControlState`]. The pipeline never touches the terminal; it only
//! observes the state's flags between work units.
//!
//! Keys: `p` pause/resume, `s` save and exit (while paused), `e` twice to
//! force quit, Ctrl+C to quit immediately. A termination signal recorded by
//! [`signals::SignalGuard`] quits the same way as Ctrl+C.

pub mod signals;
mod state;
pub mod terminal;

pub use state::{ControlFlags, ControlState, Gate, Transition};

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Exit status used when the user forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CTRL_C: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TogglePause,
    Save,
    Exit,
    Interrupt,
}

pub fn decode_key(byte: u8) -> Option<ControlCommand> {
    match byte {
        b'p' | b'P' => Some(ControlCommand::TogglePause),
        b's' | b'S' => Some(ControlCommand::Save),
        b'e' | b'E' => Some(ControlCommand::Exit),
        CTRL_C => Some(ControlCommand::Interrupt),
        _ => None,
    }
}

/// A source of single keypresses.
pub trait KeySource {
    /// Waits up to `timeout` for one key.
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<u8>>;
    /// Puts the input device back into the mode it was found in.
    fn restore(&mut self) -> Result<()>;
}

/// Handle to the listener thread. Dropping it stops and joins the thread.
pub struct ControlListener {
    stop: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl ControlListener {
    /// Spawns the listener. `on_terminate` runs after the key source has been
    /// restored when a force quit is confirmed or `interrupted` is raised; in
    /// production it exits the process.
    pub fn spawn<K, F>(
        keys: K,
        state: Arc<ControlState>,
        interrupted: &'static AtomicBool,
        on_terminate: F,
    ) -> Result<Self>
    where
        K: KeySource + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("control-listener".to_string())
            .spawn(move || listen(keys, &state, &thread_stop, interrupted, on_terminate))?;
        Ok(ControlListener {
            stop,
            join_handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                warn!("Control listener thread panicked");
            }
        }
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exits the process with [`FORCED_EXIT_CODE`].
pub fn exit_process() {
    std::process::exit(FORCED_EXIT_CODE);
}

fn listen<K, F>(mut keys: K, state: &ControlState, stop: &AtomicBool, interrupted: &AtomicBool, on_terminate: F)
where
    K: KeySource,
    F: FnOnce(),
{
    debug!("Control listener started");
    let mut keys_readable = true;
    while !stop.load(Ordering::Acquire) {
        if interrupted.load(Ordering::Acquire) {
            info!("Termination signal received - exiting");
            terminate(&mut keys, on_terminate);
            return;
        }
        if !keys_readable {
            thread::sleep(KEY_POLL_INTERVAL);
            continue;
        }
        let byte = match keys.poll_key(KEY_POLL_INTERVAL) {
            Ok(Some(byte)) => byte,
            Ok(None) => continue,
            Err(e) => {
                // Signals are still honored without keys.
                warn!("Control input failed, keys are no longer read: {:#}", e);
                keys_readable = false;
                continue;
            }
        };
        let Some(command) = decode_key(byte) else {
            continue;
        };
        let transition = state.apply(command, Instant::now());
        report(command, transition);
        if transition == Transition::Terminate {
            terminate(&mut keys, on_terminate);
            return;
        }
    }
    if let Err(e) = keys.restore() {
        warn!("Failed to restore terminal: {:#}", e);
    }
    debug!("Control listener exited");
}

fn terminate<K: KeySource, F: FnOnce()>(keys: &mut K, on_terminate: F) {
    if let Err(e) = keys.restore() {
        warn!("Failed to restore terminal before exit: {:#}", e);
    }
    on_terminate();
}

fn report(command: ControlCommand, transition: Transition) {
    match transition {
        Transition::Paused => info!("Pause requested - will pause after the current chunk"),
        Transition::Resumed => info!("Resuming"),
        Transition::ExitCancelled => info!("Exit cancelled - resuming"),
        Transition::SaveRequested => info!("Saving and exiting after the current strip..."),
        Transition::SaveIgnored => info!("Pause first (press 'p') before saving"),
        Transition::ExitArmed => info!("Press 'e' again to force quit, or 'p' to cancel and resume"),
        Transition::Terminate if command == ControlCommand::Interrupt => {
            info!("Ctrl+C detected - exiting")
        }
        Transition::Terminate => info!("Force quit confirmed - exiting immediately"),
    }
}

#[cfg(test)]
mod tests;
