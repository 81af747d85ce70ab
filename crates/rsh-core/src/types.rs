//! Core domain types

use std::fmt;

/// Offset added to a signal number when a signaled process is reported
/// through a numeric exit status (the POSIX shell convention).
pub const SIGNAL_STATUS_BASE: u32 = 128;

/// How a child process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitResult {
    /// The process exited on its own with this code
    Exited(u32),
    /// The process was terminated by this signal
    Signaled(i32),
}

impl ExitResult {
    /// Status code reported to the peer in the `exit-status` notification
    pub fn status_code(&self) -> u32 {
        match *self {
            ExitResult::Exited(code) => code,
            ExitResult::Signaled(signal) => SIGNAL_STATUS_BASE + signal.max(0) as u32,
        }
    }

    /// True for a zero exit code
    pub fn success(&self) -> bool {
        matches!(self, ExitResult::Exited(0))
    }
}

impl fmt::Display for ExitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitResult::Exited(code) => write!(f, "exited with code {}", code),
            ExitResult::Signaled(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

/// Lifecycle phase of a session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No terminal requested and no command started
    AwaitingCommand,
    /// A terminal was requested; allocation waits for the command
    TerminalPending,
    /// A child process is attached to the channel
    Running,
    /// The process exited and the channel was closed
    Terminated,
}

impl SessionPhase {
    /// Whether a shell or exec request may still start a process
    pub fn accepts_command(&self) -> bool {
        matches!(
            self,
            SessionPhase::AwaitingCommand | SessionPhase::TerminalPending
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::AwaitingCommand => write!(f, "awaiting-command"),
            SessionPhase::TerminalPending => write!(f, "terminal-pending"),
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitResult::Exited(0).status_code(), 0);
        assert_eq!(ExitResult::Exited(7).status_code(), 7);
        assert_eq!(ExitResult::Signaled(9).status_code(), 137);
        assert_eq!(ExitResult::Signaled(15).status_code(), 143);
    }

    #[test]
    fn test_exit_success() {
        assert!(ExitResult::Exited(0).success());
        assert!(!ExitResult::Exited(1).success());
        assert!(!ExitResult::Signaled(2).success());
    }

    #[test]
    fn test_phase_accepts_command() {
        assert!(SessionPhase::AwaitingCommand.accepts_command());
        assert!(SessionPhase::TerminalPending.accepts_command());
        assert!(!SessionPhase::Running.accepts_command());
        assert!(!SessionPhase::Terminated.accepts_command());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::TerminalPending.to_string(), "terminal-pending");
        assert_eq!(SessionPhase::Terminated.to_string(), "terminated");
    }
}
