// src/control/tests.rs

use super::*;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc;

/// Replays a fixed key sequence, then reports no input.
struct ScriptedKeys {
    keys: VecDeque<u8>,
    restores: Arc<AtomicUsize>,
    drained: Option<mpsc::Sender<()>>,
}

impl ScriptedKeys {
    fn new(keys: &[u8], restores: Arc<AtomicUsize>, drained: mpsc::Sender<()>) -> Self {
        ScriptedKeys {
            keys: keys.iter().copied().collect(),
            restores,
            drained: Some(drained),
        }
    }
}

impl KeySource for ScriptedKeys {
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match self.keys.pop_front() {
            Some(key) => Ok(Some(key)),
            None => {
                if let Some(tx) = self.drained.take() {
                    let _ = tx.send(());
                }
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }

    fn restore(&mut self) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A key source whose terminal has gone away.
struct ClosedKeys {
    restores: Arc<AtomicUsize>,
}

impl KeySource for ClosedKeys {
    fn poll_key(&mut self, _timeout: Duration) -> Result<Option<u8>> {
        anyhow::bail!("Control terminal closed")
    }

    fn restore(&mut self) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn signal_flag(raised: bool) -> &'static AtomicBool {
    Box::leak(Box::new(AtomicBool::new(raised)))
}

fn run_script(keys: &[u8]) -> (Arc<ControlState>, bool, usize) {
    run_script_with(keys, signal_flag(false))
}

fn run_script_with(keys: &[u8], interrupted: &'static AtomicBool) -> (Arc<ControlState>, bool, usize) {
    let state = Arc::new(ControlState::default());
    let restores = Arc::new(AtomicUsize::new(0));
    let terminated = Arc::new(AtomicBool::new(false));
    let (drained_tx, drained_rx) = mpsc::channel();

    let flag = Arc::clone(&terminated);
    let listener = ControlListener::spawn(
        ScriptedKeys::new(keys, Arc::clone(&restores), drained_tx),
        Arc::clone(&state),
        interrupted,
        move || flag.store(true, Ordering::SeqCst),
    )
    .unwrap();
    // Either the script drains or the listener terminates and drops the sender.
    let _ = drained_rx.recv_timeout(Duration::from_secs(5));
    listener.stop();

    let terminated = terminated.load(Ordering::SeqCst);
    (state, terminated, restores.load(Ordering::SeqCst))
}

#[test]
fn decodes_command_keys() {
    assert_eq!(decode_key(b'p'), Some(ControlCommand::TogglePause));
    assert_eq!(decode_key(b'S'), Some(ControlCommand::Save));
    assert_eq!(decode_key(b'e'), Some(ControlCommand::Exit));
    assert_eq!(decode_key(0x03), Some(ControlCommand::Interrupt));
    assert_eq!(decode_key(b'x'), None);
}

#[test_log::test]
fn pause_and_save_keys_request_a_save() {
    let (state, terminated, restores) = run_script(b"xps");
    assert!(!terminated);
    assert_eq!(state.flags(), ControlFlags::SAVE_REQUESTED);
    assert_eq!(restores, 1);
}

#[test_log::test]
fn exit_then_pause_keeps_running() {
    let (state, terminated, _) = run_script(b"ep");
    assert!(!terminated);
    assert_eq!(state.flags(), ControlFlags::empty());
}

#[test_log::test]
fn double_exit_terminates_after_restoring_terminal() {
    let (_, terminated, restores) = run_script(b"ee");
    assert!(terminated);
    assert!(restores >= 1);
}

#[test_log::test]
fn ctrl_c_terminates() {
    let (_, terminated, _) = run_script(&[b'p', 0x03, b'p']);
    assert!(terminated);
}

#[test_log::test]
fn termination_signal_restores_the_terminal_and_exits() {
    let (state, terminated, restores) = run_script_with(b"p", signal_flag(true));
    assert!(terminated);
    assert_eq!(restores, 1);
    // The flag is checked before any key is read.
    assert!(!state.is_paused());
}

#[test_log::test]
fn signal_after_the_terminal_closed_still_exits() {
    let restores = Arc::new(AtomicUsize::new(0));
    let interrupted = signal_flag(false);
    let (done_tx, done_rx) = mpsc::channel();
    let listener = ControlListener::spawn(
        ClosedKeys {
            restores: Arc::clone(&restores),
        },
        Arc::new(ControlState::default()),
        interrupted,
        move || {
            let _ = done_tx.send(());
        },
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(150));
    assert!(done_rx.try_recv().is_err());
    interrupted.store(true, Ordering::SeqCst);
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    listener.stop();
    assert_eq!(restores.load(Ordering::SeqCst), 1);
}
