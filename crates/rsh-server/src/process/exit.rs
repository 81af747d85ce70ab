//! Exit status conversion

use rsh_core::ExitResult;

/// Convert the status of a directly spawned child
pub fn from_std_status(status: std::process::ExitStatus) -> ExitResult {
    if let Some(code) = status.code() {
        return ExitResult::Exited(code as u32);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitResult::Signaled(signal);
        }
    }

    ExitResult::Exited(1)
}

/// Convert the status of a PTY-attached child.
///
/// `portable-pty` keeps only the `strsignal` description of a terminating
/// signal and exposes it through its `Display` output, so the description is
/// matched back to a signal number. Anything unrecognized keeps the exit
/// code it carries.
pub fn from_pty_status(status: portable_pty::ExitStatus) -> ExitResult {
    let rendered = status.to_string();
    match rendered
        .strip_prefix(PTY_SIGNAL_PREFIX)
        .and_then(signal_number)
    {
        Some(signal) => ExitResult::Signaled(signal),
        None => ExitResult::Exited(status.exit_code()),
    }
}

/// How `portable_pty::ExitStatus` renders a signal termination
const PTY_SIGNAL_PREFIX: &str = "Terminated by ";

/// Upper bound of signal numbers matched against a description
#[cfg(unix)]
const SIGNAL_LIMIT: i32 = 65;

#[cfg(unix)]
fn signal_number(description: &str) -> Option<i32> {
    // Rendered when strsignal had no text for the signal
    if let Some(number) = description.strip_prefix("Signal ") {
        return number.parse().ok();
    }

    (1..SIGNAL_LIMIT).find(|&signal| describe_signal(signal).as_deref() == Some(description))
}

#[cfg(unix)]
fn describe_signal(signal: i32) -> Option<String> {
    // SAFETY: strsignal returns a NUL-terminated string owned by libc that
    // stays valid until the next call on this thread; it is copied at once.
    unsafe {
        let name = libc::strsignal(signal);
        if name.is_null() {
            return None;
        }
        Some(std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned())
    }
}

#[cfg(not(unix))]
fn signal_number(_description: &str) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_std_exit_code() {
        let status = std::process::ExitStatus::from_raw(7 << 8);
        assert_eq!(from_std_status(status), ExitResult::Exited(7));
    }

    #[test]
    fn test_std_signal() {
        let status = std::process::ExitStatus::from_raw(libc::SIGKILL);
        assert_eq!(from_std_status(status), ExitResult::Signaled(libc::SIGKILL));
    }

    #[test]
    fn test_pty_exit_code() {
        let status = portable_pty::ExitStatus::with_exit_code(3);
        assert_eq!(from_pty_status(status), ExitResult::Exited(3));
    }

    #[test]
    fn test_pty_signal_description() {
        let description = describe_signal(libc::SIGTERM).unwrap();
        let status = portable_pty::ExitStatus::with_signal(&description);
        assert_eq!(from_pty_status(status), ExitResult::Signaled(libc::SIGTERM));

        let status = portable_pty::ExitStatus::with_signal("Signal 9");
        assert_eq!(from_pty_status(status), ExitResult::Signaled(libc::SIGKILL));

        let status = portable_pty::ExitStatus::with_signal("no such signal");
        assert_eq!(from_pty_status(status), ExitResult::Exited(1));
    }

    #[test]
    fn test_pty_status_from_killed_child() {
        let raw = std::process::ExitStatus::from_raw(libc::SIGHUP);
        let status = portable_pty::ExitStatus::from(raw);
        assert_eq!(from_pty_status(status), ExitResult::Signaled(libc::SIGHUP));
        assert_eq!(from_pty_status(portable_pty::ExitStatus::with_exit_code(0)), ExitResult::Exited(0));
    }
}
