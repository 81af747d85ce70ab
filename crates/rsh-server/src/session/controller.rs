//! Channel session controller
//!
//! One controller owns one session channel for its whole lifetime, along
//! with the terminal and the child process started on it.
//!
//! # State machine
//!
//! ```text
//! awaiting-command --pty-req--> terminal-pending
//!        |                            |
//!        +------shell / exec----------+--> running --exit--> terminated
//! ```
//!
//! A channel enters `running` at most once. Run requests in `running` or
//! `terminated` are rejected and never start a second process. Geometry from
//! `window-change` requests is remembered in every phase and applied to the
//! terminal when it is allocated.
//!
//! Requests keep being answered while the exit sequence or a teardown is in
//! progress, so a transport waiting on a decision never stalls the output
//! the controller is flushing to it.

use std::ffi::OsString;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rsh_core::config::SessionSettings;
use rsh_core::error::SessionError;
use rsh_core::traits::ChannelSink;
use rsh_core::{ExitResult, SessionPhase};
use rsh_protocol::{ChannelRequest, ExecRequest, PtyRequest, RequestKind, TerminalSize, WindowChange};

use super::relay::Relays;
use super::{ChannelInbox, IncomingRequest};
use crate::process::{self, CommandSpec, ProcessHandle, ProcessIo, StreamAttachment};
use crate::pty::{ResizeOutcome, Terminal};

/// Per-channel state
enum SessionState {
    AwaitingCommand,
    TerminalPending,
    Running(Box<RunningProcess>),
    Terminated,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::AwaitingCommand => SessionPhase::AwaitingCommand,
            SessionState::TerminalPending => SessionPhase::TerminalPending,
            SessionState::Running(_) => SessionPhase::Running,
            SessionState::Terminated => SessionPhase::Terminated,
        }
    }
}

/// Resources owned while a process runs
struct RunningProcess {
    process: ProcessHandle,
    terminal: Option<Terminal>,
    relays: Relays,
}

/// A process that was spawned but whose relays are not started yet
struct Launched {
    process: ProcessHandle,
    io: ProcessIo,
    terminal: Option<Terminal>,
    input: mpsc::UnboundedReceiver<Bytes>,
}

/// Outcome of dispatching one request
enum Dispatch {
    Done(Result<(), SessionError>),
    Started(Launched),
}

/// What woke the controller up
enum Event {
    Request(Option<IncomingRequest>),
    Exited(Result<ExitResult, SessionError>),
    RelayFailed,
    Shutdown,
}

/// Controller for one session channel
pub struct ChannelSession {
    label: String,
    settings: Arc<SessionSettings>,
    sink: Arc<dyn ChannelSink>,
    state: SessionState,
    /// Last geometry seen from pty-req or window-change
    geometry: TerminalSize,
    /// TERM value from the pty-req
    term: Option<String>,
    /// Peer data, handed to the process that gets started
    input: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl ChannelSession {
    /// Create a controller for a freshly accepted channel
    pub fn new(
        label: impl Into<String>,
        settings: Arc<SessionSettings>,
        sink: Arc<dyn ChannelSink>,
    ) -> Self {
        Self {
            label: label.into(),
            settings,
            sink,
            state: SessionState::AwaitingCommand,
            geometry: TerminalSize::default(),
            term: None,
            input: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Run the channel until the peer's request stream ends or `shutdown`
    /// fires. Any process still running at that point is terminated.
    pub async fn run(mut self, inbox: ChannelInbox, shutdown: CancellationToken) {
        let ChannelInbox {
            mut requests,
            input,
        } = inbox;
        self.input = Some(input);

        tracing::info!("Session channel {} opened", self.label);

        loop {
            let event = match &mut self.state {
                SessionState::Running(running) => {
                    let running = &mut **running;
                    tokio::select! {
                        request = requests.recv() => Event::Request(request),
                        exit = running.process.wait() => Event::Exited(exit),
                        _ = running.relays.failed() => Event::RelayFailed,
                        _ = shutdown.cancelled() => Event::Shutdown,
                    }
                }
                _ => {
                    tokio::select! {
                        request = requests.recv() => Event::Request(request),
                        _ = shutdown.cancelled() => Event::Shutdown,
                    }
                }
            };

            match event {
                Event::Request(Some(request)) => self.handle_request(request),
                Event::Request(None) => {
                    tracing::debug!("Request stream of {} ended", self.label);
                    if let Some(running) = self.take_running() {
                        teardown(&self.label, running, self.settings.kill_grace_period).await;
                    }
                    break;
                }
                Event::Exited(exit) => {
                    if let Some(running) = self.take_running() {
                        let exit_sequence = finish(
                            self.label.clone(),
                            running,
                            exit,
                            Arc::clone(&self.sink),
                            self.settings.output_drain_timeout,
                        );
                        self.answer_while(exit_sequence, &mut requests).await;
                    }
                }
                Event::RelayFailed => {
                    tracing::warn!("Relay of {} failed, tearing down", self.label);
                    let stop = self.stop_and_close();
                    self.answer_while(stop, &mut requests).await;
                }
                Event::Shutdown => {
                    tracing::debug!("Shutting down {}", self.label);
                    let stop = self.stop_and_close();
                    self.answer_while(stop, &mut requests).await;
                    break;
                }
            }
        }

        tracing::info!("Session channel {} closed", self.label);
    }

    /// Drive `work` to completion while still answering requests
    async fn answer_while(
        &mut self,
        work: impl Future<Output = ()>,
        requests: &mut mpsc::UnboundedReceiver<IncomingRequest>,
    ) {
        tokio::pin!(work);
        loop {
            tokio::select! {
                () = &mut work => return,
                Some(request) = requests.recv() => self.handle_request(request),
            }
        }
    }

    /// Terminate any running process, then close the channel
    fn stop_and_close(&mut self) -> impl Future<Output = ()> + 'static {
        let running = self.take_running();
        let label = self.label.clone();
        let grace = self.settings.kill_grace_period;
        let sink = Arc::clone(&self.sink);

        async move {
            if let Some(running) = running {
                teardown(&label, running, grace).await;
            }
            if let Err(e) = sink.close().await {
                tracing::debug!("{}: failed to close channel: {}", label, e);
            }
        }
    }

    fn take_running(&mut self) -> Option<Box<RunningProcess>> {
        match std::mem::replace(&mut self.state, SessionState::Terminated) {
            SessionState::Running(running) => Some(running),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn handle_request(&mut self, mut incoming: IncomingRequest) {
        let ChannelRequest {
            kind,
            payload,
            want_reply,
        } = &incoming.request;

        tracing::debug!(
            "{}: {} request while {} (want_reply: {})",
            self.label,
            kind,
            self.state.phase(),
            want_reply
        );

        let dispatch = match kind {
            RequestKind::PtyRequest => Dispatch::Done(self.request_terminal(payload)),
            RequestKind::WindowChange => Dispatch::Done(self.change_window(payload)),
            RequestKind::Shell => match self.start_shell(payload) {
                Ok(launched) => Dispatch::Started(launched),
                Err(e) => Dispatch::Done(Err(e)),
            },
            RequestKind::Exec => match self.start_exec(payload) {
                Ok(launched) => Dispatch::Started(launched),
                Err(e) => Dispatch::Done(Err(e)),
            },
            RequestKind::Other(name) => Dispatch::Done(Err(SessionError::Unsupported(name.clone()))),
        };

        let (accepted, launched) = match dispatch {
            Dispatch::Done(Ok(())) => (true, None),
            Dispatch::Done(Err(e)) => {
                tracing::debug!("{}: rejected {} request: {}", self.label, kind, e);
                (false, None)
            }
            Dispatch::Started(launched) => (true, Some(launched)),
        };

        incoming.reply(accepted);

        // Relays start after the reply so no output precedes it
        if let Some(launched) = launched {
            self.attach(launched);
        }
    }

    fn request_terminal(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::AwaitingCommand) {
            return Err(SessionError::InvalidPhase(self.state.phase()));
        }

        let request = PtyRequest::decode(payload)?;
        if !request.size.is_unset() {
            self.geometry = request.size;
        }
        self.term = Some(if request.term.is_empty() {
            self.settings.default_term.clone()
        } else {
            request.term
        });

        tracing::debug!(
            "{}: terminal requested ({}, {})",
            self.label,
            self.term.as_deref().unwrap_or_default(),
            self.geometry
        );
        self.state = SessionState::TerminalPending;
        Ok(())
    }

    fn change_window(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let change = WindowChange::decode(payload)?;
        if change.size.is_unset() {
            tracing::debug!("{}: ignoring empty geometry {}", self.label, change.size);
            return Ok(());
        }

        self.geometry = change.size;

        if let SessionState::Running(running) = &mut self.state {
            if let Some(terminal) = running.terminal.as_mut() {
                if terminal.resize(change.size)? == ResizeOutcome::Ignored {
                    tracing::trace!("{}: terminal already released", self.label);
                }
            }
        }

        Ok(())
    }

    fn start_shell(&mut self, payload: &[u8]) -> Result<Launched, SessionError> {
        let phase = self.state.phase();
        if !phase.accepts_command() {
            return Err(SessionError::AlreadyStarted(phase));
        }
        if !payload.is_empty() {
            return Err(SessionError::UnsupportedCommand);
        }

        let shell = self
            .settings
            .resolve_shell()
            .ok_or_else(|| SessionError::NoShell(self.settings.shell_candidates.clone()))?;
        let spec = self.command(shell).args(self.settings.shell_args());

        let on_terminal = matches!(self.state, SessionState::TerminalPending);
        self.launch(spec, on_terminal)
    }

    fn start_exec(&mut self, payload: &[u8]) -> Result<Launched, SessionError> {
        let phase = self.state.phase();
        if !phase.accepts_command() {
            return Err(SessionError::AlreadyStarted(phase));
        }

        let request = ExecRequest::decode(payload)?;
        tracing::debug!(
            "{}: exec {:?}",
            self.label,
            String::from_utf8_lossy(&request.command)
        );

        let spec = self
            .command(self.settings.system_shell.clone())
            .args([OsString::from("-c"), command_line(&request.command)]);

        // Commands always run on plain pipes, even after a pty-req
        self.launch(spec, false)
    }

    fn command(&self, program: std::path::PathBuf) -> CommandSpec {
        let mut spec = CommandSpec::new(program).working_dir(self.settings.working_dir.clone());
        for (key, value) in &self.settings.env {
            spec = spec.env(key.clone(), value.clone());
        }
        spec
    }

    /// Spawn `spec`, handing it the channel's input stream
    fn launch(&mut self, spec: CommandSpec, on_terminal: bool) -> Result<Launched, SessionError> {
        let input = self.input.take().ok_or(SessionError::InputDetached)?;

        let spawned = if on_terminal {
            self.spawn_on_terminal(spec)
        } else {
            process::spawn(&spec, StreamAttachment::Piped).map(|(process, io)| (process, io, None))
        };

        match spawned {
            Ok((process, io, terminal)) => Ok(Launched {
                process,
                io,
                terminal,
                input,
            }),
            Err(e) => {
                // Still idle; a later request may succeed
                self.input = Some(input);
                Err(e)
            }
        }
    }

    fn spawn_on_terminal(
        &self,
        spec: CommandSpec,
    ) -> Result<(ProcessHandle, ProcessIo, Option<Terminal>), SessionError> {
        let term = self
            .term
            .clone()
            .unwrap_or_else(|| self.settings.default_term.clone());
        let spec = spec.env("TERM", term);

        let mut terminal = Terminal::allocate(self.geometry)?;
        tracing::debug!("{}: allocated {} PTY", self.label, terminal.size());
        let (process, io) = process::spawn(&spec, StreamAttachment::Terminal(&mut terminal))?;

        Ok((process, io, Some(terminal)))
    }

    fn attach(&mut self, launched: Launched) {
        let Launched {
            process,
            io,
            terminal,
            input,
        } = launched;

        let relays = Relays::start(self.label.clone(), io, Arc::clone(&self.sink), input);

        self.state = SessionState::Running(Box::new(RunningProcess {
            process,
            terminal,
            relays,
        }));
    }
}

/// Command line bytes as a process argument
#[cfg(unix)]
fn command_line(raw: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::OsStr::from_bytes(raw).to_os_string()
}

#[cfg(not(unix))]
fn command_line(raw: &[u8]) -> OsString {
    String::from_utf8_lossy(raw).into_owned().into()
}

/// The process exited: drain output, then report and close
async fn finish(
    label: String,
    mut running: Box<RunningProcess>,
    exit: Result<ExitResult, SessionError>,
    sink: Arc<dyn ChannelSink>,
    drain_timeout: Duration,
) {
    running.relays.drain(drain_timeout).await;

    if let Some(mut terminal) = running.terminal.take() {
        terminal.release();
    }

    if let Err(e) = sink.eof().await {
        tracing::debug!("{}: failed to send EOF: {}", label, e);
    }

    match exit {
        Ok(result) => {
            tracing::info!("{}: process {}", label, result);
            if let Err(e) = sink.exit_status(result.status_code()).await {
                tracing::debug!("{}: failed to send exit status: {}", label, e);
            }
        }
        Err(e) => {
            tracing::error!("{}: could not observe process exit: {}", label, e);
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("{}: failed to close channel: {}", label, e);
    }
}

/// The channel is going away: stop the process and free the terminal
async fn teardown(label: &str, mut running: Box<RunningProcess>, grace: Duration) {
    running.relays.abort();

    match running.process.terminate(grace).await {
        Ok(result) => tracing::info!("{}: process stopped on teardown, {}", label, result),
        Err(e) => tracing::warn!("{}: failed to stop process: {}", label, e),
    }

    if let Some(mut terminal) = running.terminal.take() {
        terminal.release();
    }
}
