// src/control/terminal.rs

//! Reads single keypresses from the controlling terminal.
//!
//! Stdin is switched to a non-canonical, no-echo mode with signal generation
//! disabled, so Ctrl+C arrives as a byte and is handled like any other
//! command. Output post-processing is left on so log lines still render.

use super::KeySource;
use anyhow::{bail, Context, Result};
use libc::STDIN_FILENO;
use log::{debug, trace, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use termios::{tcsetattr, Termios, ECHO, ICANON, ISIG, TCSANOW, VMIN, VTIME};

pub struct TerminalKeys {
    fd: RawFd,
    original_termios: Option<Termios>,
}

impl TerminalKeys {
    /// Binds to stdin. Fails when stdin is not a terminal.
    pub fn open() -> Result<Self> {
        Self::from_fd(STDIN_FILENO)
    }

    pub fn from_fd(fd: RawFd) -> Result<Self> {
        let original = Termios::from_fd(fd)
            .with_context(|| format!("fd {} is not a terminal; cannot read control keys", fd))?;

        let mut raw = original;
        raw.c_lflag &= !(ECHO | ICANON | ISIG);
        raw.c_iflag &= !(libc::IXON | libc::IXOFF | libc::ICRNL | libc::INLCR | libc::IGNCR);
        raw.c_cc[VMIN] = 0;
        raw.c_cc[VTIME] = 0;
        tcsetattr(fd, TCSANOW, &raw).context("Failed to set raw terminal attributes")?;
        debug!("TerminalKeys: fd {} switched to raw key mode", fd);

        Ok(TerminalKeys {
            fd,
            original_termios: Some(original),
        })
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("TerminalKeys: poll interrupted (EINTR)");
                return Ok(false);
            }
            return Err(err).context("poll on control terminal failed");
        }
        Ok(ready > 0 && pollfd.revents & libc::POLLIN != 0)
    }
}

impl KeySource for TerminalKeys {
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<u8>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        let mut byte = 0u8;
        let n = unsafe { libc::read(self.fd, (&mut byte as *mut u8).cast(), 1) };
        match n {
            1 => Ok(Some(byte)),
            // Readable but empty: the terminal hung up.
            0 => bail!("Control terminal closed"),
            _ => {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                    _ => Err(err).context("Failed to read from control terminal"),
                }
            }
        }
    }

    fn restore(&mut self) -> Result<()> {
        if let Some(original) = self.original_termios.take() {
            tcsetattr(self.fd, TCSANOW, &original)
                .context("Failed to restore original terminal attributes")?;
            debug!("TerminalKeys: terminal attributes restored");
        }
        Ok(())
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("TerminalKeys: error restoring terminal in drop: {:#}", e);
        }
    }
}
