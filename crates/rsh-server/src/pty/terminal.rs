//! PTY allocation, resize and release
//!
//! Wraps a `portable-pty` pair for a single channel. The controlling side
//! stays with the channel's controller; the subordinate side is handed to
//! exactly one child process and dropped right after the spawn so that
//! reads on the controlling side reach end-of-stream once the child exits.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};

use rsh_core::error::SessionError;
use rsh_protocol::TerminalSize;

/// Geometry used when the peer never supplied one
pub const DEFAULT_TERMINAL_SIZE: TerminalSize = TerminalSize { cols: 80, rows: 24 };

/// Result of a resize call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The live terminal now has the new geometry
    Applied,
    /// The terminal was already released; nothing to do
    Ignored,
}

/// A pseudo-terminal owned by one channel
pub struct Terminal {
    /// Controlling side, `None` once released
    master: Option<Box<dyn MasterPty + Send>>,
    /// Subordinate side, `None` once attached to a child
    slave: Option<Box<dyn SlavePty + Send>>,
    /// Current geometry
    size: TerminalSize,
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl Terminal {
    /// Allocate a terminal with the given geometry
    pub fn allocate(size: TerminalSize) -> Result<Self, SessionError> {
        let size = if size.is_unset() {
            DEFAULT_TERMINAL_SIZE
        } else {
            size
        };

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| SessionError::TerminalAllocation(e.to_string()))?;

        tracing::debug!("Allocated PTY with size {}", size);

        Ok(Self {
            master: Some(pair.master),
            slave: Some(pair.slave),
            size,
        })
    }

    /// Start `cmd` with the subordinate side as its controlling terminal.
    ///
    /// Can succeed at most once per terminal.
    pub fn spawn(
        &mut self,
        program: &str,
        cmd: CommandBuilder,
    ) -> Result<Box<dyn Child + Send + Sync>, SessionError> {
        let slave = self.slave.take().ok_or_else(|| SessionError::Spawn {
            program: program.to_string(),
            source: std::io::Error::other("terminal already attached to a process"),
        })?;

        let child = slave.spawn_command(cmd).map_err(|e| SessionError::Spawn {
            program: program.to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        // `slave` drops here; the child holds the only remaining handles
        Ok(child)
    }

    /// Reader for output written by the child
    pub fn reader(&self) -> Result<Box<dyn Read + Send>, SessionError> {
        let master = self.master()?;
        master
            .try_clone_reader()
            .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))
    }

    /// Writer delivering input to the child. May be taken once.
    pub fn writer(&self) -> Result<Box<dyn Write + Send>, SessionError> {
        let master = self.master()?;
        master
            .take_writer()
            .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))
    }

    /// Change the geometry of a live terminal
    pub fn resize(&mut self, size: TerminalSize) -> Result<ResizeOutcome, SessionError> {
        let Some(master) = self.master.as_ref() else {
            tracing::trace!("Ignoring resize to {} on released PTY", size);
            return Ok(ResizeOutcome::Ignored);
        };

        master
            .resize(pty_size(size))
            .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))?;

        tracing::debug!("Resized PTY from {} to {}", self.size, size);
        self.size = size;
        Ok(ResizeOutcome::Applied)
    }

    /// Release both sides of the terminal. Safe to call repeatedly.
    pub fn release(&mut self) {
        let had_master = self.master.take().is_some();
        self.slave = None;
        if had_master {
            tracing::debug!("Released PTY");
        }
    }

    /// Current geometry
    pub fn size(&self) -> TerminalSize {
        self.size
    }

    fn master(&self) -> Result<&(dyn MasterPty + Send), SessionError> {
        self.master
            .as_deref()
            .ok_or_else(|| SessionError::TerminalAllocation("terminal already released".to_string()))
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_uses_default_for_unset_size() {
        let terminal = Terminal::allocate(TerminalSize::default()).unwrap();
        assert_eq!(terminal.size(), DEFAULT_TERMINAL_SIZE);
    }

    #[test]
    fn test_resize_live_terminal() {
        let mut terminal = Terminal::allocate(TerminalSize::new(80, 24)).unwrap();
        let outcome = terminal.resize(TerminalSize::new(132, 50)).unwrap();
        assert_eq!(outcome, ResizeOutcome::Applied);
        assert_eq!(terminal.size(), TerminalSize::new(132, 50));
    }

    #[test]
    fn test_resize_after_release_is_ignored() {
        let mut terminal = Terminal::allocate(TerminalSize::new(80, 24)).unwrap();
        terminal.release();
        terminal.release();

        let outcome = terminal.resize(TerminalSize::new(100, 30)).unwrap();
        assert_eq!(outcome, ResizeOutcome::Ignored);
        assert_eq!(terminal.size(), TerminalSize::new(80, 24));
    }

    #[test]
    fn test_streams_unavailable_after_release() {
        let mut terminal = Terminal::allocate(TerminalSize::new(80, 24)).unwrap();
        terminal.release();
        assert!(terminal.reader().is_err());
        assert!(terminal.writer().is_err());
    }

    #[test]
    fn test_spawn_only_once() {
        let mut terminal = Terminal::allocate(TerminalSize::new(80, 24)).unwrap();

        let mut first = CommandBuilder::new("/bin/sh");
        first.args(["-c", "exit 0"]);
        let mut child = terminal.spawn("/bin/sh", first).unwrap();

        let mut second = CommandBuilder::new("/bin/sh");
        second.args(["-c", "exit 0"]);
        assert!(matches!(
            terminal.spawn("/bin/sh", second),
            Err(SessionError::Spawn { .. })
        ));

        let _ = child.wait();
    }
}
