// src/control/state.rs

//! Shared pause/exit state. The control listener applies commands; the
//! strip loop and the pyramid tile tasks read the flags and consume a
//! pending save request. Every write holds the transition lock.

use super::ControlCommand;
use bitflags::bitflags;
use log::info;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlFlags: u8 {
        const PAUSED = 1 << 0;
        const EXIT_ARMED = 1 << 1;
        const SAVE_REQUESTED = 1 << 2;
    }
}

/// Result of applying one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Paused,
    Resumed,
    ExitCancelled,
    SaveRequested,
    /// Save is only honored while paused and no exit is armed.
    SaveIgnored,
    ExitArmed,
    /// Leave the process immediately.
    Terminate,
}

/// What a loop blocked on the pause gate should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Save,
}

#[derive(Debug)]
pub struct ControlState {
    flags: AtomicU8,
    // Serializes transitions and remembers when the exit was armed.
    armed_at: Mutex<Option<Instant>>,
    exit_window: Duration,
    poll_interval: Duration,
}

impl ControlState {
    pub fn new(exit_window: Duration, poll_interval: Duration) -> Self {
        ControlState {
            flags: AtomicU8::new(ControlFlags::empty().bits()),
            armed_at: Mutex::new(None),
            exit_window,
            poll_interval,
        }
    }

    pub fn flags(&self) -> ControlFlags {
        ControlFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn lock_transitions(&self) -> MutexGuard<'_, Option<Instant>> {
        match self.armed_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn store(&self, flags: ControlFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.flags().contains(ControlFlags::PAUSED)
    }

    /// Applies one command. `now` stamps exit arming so the confirmation
    /// window can be checked.
    pub fn apply(&self, command: ControlCommand, now: Instant) -> Transition {
        let mut armed_at = self.lock_transitions();
        let mut flags = self.flags();

        let transition = match command {
            ControlCommand::TogglePause => {
                if flags.contains(ControlFlags::EXIT_ARMED) {
                    flags.remove(ControlFlags::EXIT_ARMED | ControlFlags::PAUSED);
                    *armed_at = None;
                    Transition::ExitCancelled
                } else if flags.contains(ControlFlags::PAUSED) {
                    flags.remove(ControlFlags::PAUSED);
                    Transition::Resumed
                } else {
                    flags.insert(ControlFlags::PAUSED);
                    Transition::Paused
                }
            }
            ControlCommand::Save => {
                if flags.contains(ControlFlags::EXIT_ARMED) || !flags.contains(ControlFlags::PAUSED) {
                    Transition::SaveIgnored
                } else {
                    flags.remove(ControlFlags::PAUSED);
                    flags.insert(ControlFlags::SAVE_REQUESTED);
                    Transition::SaveRequested
                }
            }
            ControlCommand::Exit => {
                let confirmed = flags.contains(ControlFlags::EXIT_ARMED)
                    && armed_at.is_some_and(|t| now.saturating_duration_since(t) <= self.exit_window);
                if confirmed {
                    Transition::Terminate
                } else {
                    flags.insert(ControlFlags::EXIT_ARMED | ControlFlags::PAUSED);
                    *armed_at = Some(now);
                    Transition::ExitArmed
                }
            }
            ControlCommand::Interrupt => Transition::Terminate,
        };

        self.store(flags);
        transition
    }

    /// Blocks while paused, re-checking every poll interval. Returns
    /// [`Gate::Save`] as soon as a save has been requested.
    pub fn wait_while_paused(&self) -> Gate {
        let mut announced = false;
        loop {
            let flags = self.flags();
            if flags.contains(ControlFlags::SAVE_REQUESTED) {
                return Gate::Save;
            }
            if !flags.contains(ControlFlags::PAUSED) {
                return Gate::Proceed;
            }
            if !announced && !flags.contains(ControlFlags::EXIT_ARMED) {
                info!("Paused. Press 'p' to resume, 's' to save and exit.");
                announced = true;
            }
            thread::sleep(self.poll_interval);
        }
    }

    pub fn save_requested(&self) -> bool {
        self.flags().contains(ControlFlags::SAVE_REQUESTED)
    }

    /// Consumes a pending save request.
    pub fn take_save_request(&self) -> bool {
        let _transition = self.lock_transitions();
        let mut flags = self.flags();
        let requested = flags.contains(ControlFlags::SAVE_REQUESTED);
        flags.remove(ControlFlags::SAVE_REQUESTED);
        self.store(flags);
        requested
    }
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState::new(Duration::from_secs(3), Duration::from_millis(100))
    }
}
