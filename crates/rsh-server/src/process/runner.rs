//! Process spawning and termination
//!
//! A channel runs at most one child. The child's standard streams are either
//! attached to the channel's [`Terminal`] (one combined duplex stream) or
//! piped individually. Termination is observed by a background task so that
//! waiting never blocks the channel's relays.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use portable_pty::CommandBuilder;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use rsh_core::error::SessionError;
use rsh_core::ExitResult;

use super::exit::{from_pty_status, from_std_status};
use crate::pty::Terminal;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program path
    pub program: PathBuf,
    /// Arguments after the program name
    pub args: Vec<OsString>,
    /// Working directory (inherited when `None`)
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Describe a run of `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn label(&self) -> String {
        self.program.display().to_string()
    }
}

/// Where the child's standard streams go
pub enum StreamAttachment<'a> {
    /// stdin, stdout and stderr all on the terminal's subordinate side
    Terminal(&'a mut Terminal),
    /// Three independent pipes
    Piped,
}

/// The parent's ends of the child's streams
pub enum ProcessIo {
    /// Combined duplex terminal stream (blocking handles)
    Terminal {
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    },
    /// Separate pipes
    Piped {
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: ChildStderr,
    },
}

/// Start a child process
pub fn spawn(
    spec: &CommandSpec,
    attachment: StreamAttachment<'_>,
) -> Result<(ProcessHandle, ProcessIo), SessionError> {
    match attachment {
        StreamAttachment::Terminal(terminal) => spawn_on_terminal(spec, terminal),
        StreamAttachment::Piped => spawn_piped(spec),
    }
}

fn spawn_on_terminal(
    spec: &CommandSpec,
    terminal: &mut Terminal,
) -> Result<(ProcessHandle, ProcessIo), SessionError> {
    let label = spec.label();

    let mut cmd = CommandBuilder::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(dir) = &spec.working_dir {
        cmd.cwd(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let reader = terminal.reader()?;
    let writer = terminal.writer()?;
    let mut child = terminal.spawn(&label, cmd)?;

    let pid = child.process_id();
    tracing::info!("Spawned {} on PTY with PID {:?}", label, pid);

    let exit = tokio::task::spawn_blocking(move || child.wait().map(from_pty_status));

    Ok((
        ProcessHandle::new(label, pid, exit),
        ProcessIo::Terminal { reader, writer },
    ))
}

fn spawn_piped(spec: &CommandSpec) -> Result<(ProcessHandle, ProcessIo), SessionError> {
    let label = spec.label();

    let mut std_cmd = std::process::Command::new(&spec.program);
    std_cmd
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.working_dir {
        std_cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so teardown reaches the whole pipeline
        std_cmd.process_group(0);
    }

    let mut cmd = tokio::process::Command::from(std_cmd);
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| SessionError::Spawn {
        program: label.clone(),
        source,
    })?;

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(SessionError::Spawn {
            program: label,
            source: io::Error::other("child pipes were not created"),
        });
    };

    let pid = child.id();
    tracing::info!("Spawned {} with PID {:?}", label, pid);

    let exit = tokio::spawn(async move { child.wait().await.map(from_std_status) });

    Ok((
        ProcessHandle::new(label, pid, exit),
        ProcessIo::Piped {
            stdin,
            stdout,
            stderr,
        },
    ))
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Hangup,
    Kill,
}

/// Owner's handle on a running child.
///
/// Dropping the handle before the child has exited kills it.
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    /// Background wait task, `None` once its result was collected
    exit: Option<JoinHandle<io::Result<ExitResult>>>,
    result: Option<ExitResult>,
}

impl ProcessHandle {
    fn new(label: String, pid: Option<u32>, exit: JoinHandle<io::Result<ExitResult>>) -> Self {
        Self {
            label,
            pid,
            exit: Some(exit),
            result: None,
        }
    }

    /// Process ID, if the platform reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the child to terminate.
    ///
    /// Cancel-safe: dropping the future before completion loses nothing, and
    /// calling it again after completion returns the same result.
    pub async fn wait(&mut self) -> Result<ExitResult, SessionError> {
        if let Some(result) = self.result {
            return Ok(result);
        }

        let Some(exit) = self.exit.as_mut() else {
            return Err(SessionError::Io(io::Error::other(
                "exit status of failed wait already consumed",
            )));
        };

        let joined = exit.await;
        self.exit = None;

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(SessionError::Io(e)),
            Err(e) => return Err(SessionError::Io(io::Error::other(e.to_string()))),
        };

        tracing::info!("{} (PID {:?}) {}", self.label, self.pid, result);
        self.result = Some(result);
        Ok(result)
    }

    /// Whether termination has already been observed by the wait task
    pub fn has_exited(&self) -> bool {
        self.result.is_some() || self.exit.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Terminate the child: hang-up first, forced kill after `grace`
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitResult, SessionError> {
        if !self.has_exited() {
            tracing::debug!("Sending SIGHUP to {} (PID {:?})", self.label, self.pid);
            self.signal(Signal::Hangup);

            if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
                return result;
            }

            tracing::warn!(
                "{} (PID {:?}) still running {:?} after SIGHUP, killing",
                self.label,
                self.pid,
                grace
            );
            self.signal(Signal::Kill);
        }

        self.wait().await
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) {
        let Some(pid) = self.pid else {
            return;
        };
        let signal = match signal {
            Signal::Hangup => libc::SIGHUP,
            Signal::Kill => libc::SIGKILL,
        };
        let pid = pid as libc::pid_t;

        // SAFETY: kill(2) has no memory-safety preconditions
        unsafe {
            if libc::kill(-pid, signal) != 0 {
                libc::kill(pid, signal);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: Signal) {}
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.has_exited() {
            tracing::debug!("Killing {} (PID {:?}) on drop", self.label, self.pid);
            self.signal(Signal::Kill);
        }
    }
}
