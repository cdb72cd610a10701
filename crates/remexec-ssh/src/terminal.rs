//! Local terminal handling
//!
//! When stdin is an interactive terminal, a run puts it into raw mode and
//! asks the remote side for a matching pseudo-terminal. Raw mode is held by
//! a [`RawModeGuard`] which restores the previous mode when dropped, so the
//! terminal is restored on every exit path of the run, including errors,
//! panics and cancellation.

use std::fmt;
use std::io::{self, Write};

use crossterm::terminal;
use crossterm::tty::IsTty;
use tokio::io::AsyncRead;
use tracing::{debug, error};

use crate::transport::{PtyRequest, TerminalMode};

/// Terminal geometry in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

/// Restores the terminal mode when dropped
#[must_use = "dropping the guard restores the terminal immediately"]
pub struct RawModeGuard {
    restore: Option<Box<dyn FnOnce() -> io::Result<()> + Send>>,
}

impl RawModeGuard {
    /// Guard that runs `restore` once, on drop or on [`RawModeGuard::restore`]
    pub fn new(restore: impl FnOnce() -> io::Result<()> + Send + 'static) -> Self {
        Self {
            restore: Some(Box::new(restore)),
        }
    }

    /// Restore now and report the result
    ///
    /// # Errors
    /// Returns the error of the restore action.
    pub fn restore(mut self) -> io::Result<()> {
        match self.restore.take() {
            Some(restore) => restore(),
            None => Ok(()),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take()
            && let Err(e) = restore()
        {
            error!(error = %e, "failed to restore terminal mode");
            let _ = writeln!(io::stderr(), "\r\nWarning: failed to restore terminal mode");
        }
    }
}

impl fmt::Debug for RawModeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawModeGuard")
            .field("armed", &self.restore.is_some())
            .finish()
    }
}

/// The local console a session runs from
pub trait Console: Send + Sync {
    /// Whether stdin is attached to an interactive terminal
    fn is_interactive(&self) -> bool;

    /// Current terminal geometry
    ///
    /// # Errors
    /// Returns the I/O error from querying the terminal.
    fn size(&self) -> io::Result<TerminalSize>;

    /// Switch to raw mode until the returned guard is dropped
    ///
    /// # Errors
    /// Returns the I/O error from changing the terminal mode.
    fn enter_raw_mode(&self) -> io::Result<RawModeGuard>;

    /// Input forwarded by a run that has no stdin reader attached
    fn stdin(&self) -> Box<dyn AsyncRead + Send + Unpin>;
}

/// The process's own terminal, driven through crossterm
#[derive(Debug, Clone, Copy, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn is_interactive(&self) -> bool {
        io::stdin().is_tty()
    }

    fn size(&self) -> io::Result<TerminalSize> {
        let (cols, rows) = terminal::size()?;
        Ok(TerminalSize { cols, rows })
    }

    fn enter_raw_mode(&self) -> io::Result<RawModeGuard> {
        terminal::enable_raw_mode()?;
        debug!("local terminal switched to raw mode");
        Ok(RawModeGuard::new(terminal::disable_raw_mode))
    }

    /// The process stdin
    ///
    /// Reads happen on a blocking thread; a read still pending when the run
    /// ends is not cancelled.
    fn stdin(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(tokio::io::stdin())
    }
}

/// Pseudo-terminal request matching the local terminal
///
/// Remote echo is disabled and both baud rates are fixed to `baud_rate`.
#[must_use]
pub fn pty_request(term: &str, size: TerminalSize, baud_rate: u32) -> PtyRequest {
    PtyRequest {
        term: term.to_string(),
        size,
        modes: vec![
            (TerminalMode::EchoCtl, 0),
            (TerminalMode::Echo, 0),
            (TerminalMode::InputSpeed, baud_rate),
            (TerminalMode::OutputSpeed, baud_rate),
        ],
    }
}
