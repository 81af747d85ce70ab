//! Connection supervisor
//!
//! Consumes the channel-open and global-request events of one authenticated
//! connection. Session channels get their own [`ChannelSession`] task;
//! everything else is turned away. A failing channel never affects its
//! siblings.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use rsh_core::config::SessionSettings;
use rsh_core::traits::ChannelSink;

use crate::session::{self, ChannelPorts, ChannelSession};

/// The only channel type this server accepts
pub const SESSION_CHANNEL: &str = "session";

/// Connection-level events delivered by the transport
pub enum ConnectionEvent {
    /// The peer wants to open a channel
    ChannelOpen(ChannelOpen),
    /// A global (non-channel) request; never answered
    GlobalRequest { name: String },
}

/// A pending channel-open decision
pub struct ChannelOpen {
    /// Channel type requested by the peer
    pub kind: String,
    /// Outbound half of the channel, used if it is accepted
    pub sink: Arc<dyn ChannelSink>,
    /// Where the decision goes
    pub respond: oneshot::Sender<Result<ChannelPorts, OpenFailure>>,
}

/// Why a channel open was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    /// Channel type other than `session`
    #[error("unknown channel type {0:?}")]
    UnknownChannelType(String),
    /// Per-connection channel limit reached
    #[error("too many open channels")]
    ResourceShortage,
}

/// Dispatcher for one connection's channels
pub struct ConnectionSupervisor {
    peer: String,
    settings: Arc<SessionSettings>,
    max_channels: Option<usize>,
    shutdown: CancellationToken,
    controllers: JoinSet<()>,
    opened: u64,
}

impl ConnectionSupervisor {
    /// Create a supervisor for the connection from `peer`.
    ///
    /// Cancelling `shutdown` stops every channel of the connection.
    pub fn new(
        peer: impl Into<String>,
        settings: Arc<SessionSettings>,
        max_channels: Option<usize>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            peer: peer.into(),
            settings,
            max_channels,
            shutdown,
            controllers: JoinSet::new(),
            opened: 0,
        }
    }

    /// Serve events until the transport's event stream ends, then wait for
    /// the remaining channel controllers to finish.
    pub async fn run(mut self, mut events: mpsc::Receiver<ConnectionEvent>) {
        tracing::info!("Supervising connection from {}", self.peer);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(joined) = self.controllers.join_next(), if !self.controllers.is_empty() => {
                    Self::reap(joined);
                }
            }
        }

        tracing::debug!(
            "Event stream from {} ended, waiting for {} channels",
            self.peer,
            self.controllers.len()
        );
        while let Some(joined) = self.controllers.join_next().await {
            Self::reap(joined);
        }

        tracing::info!("Connection from {} finished ({} channels served)", self.peer, self.opened);
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::ChannelOpen(open) => self.open_channel(open),
            ConnectionEvent::GlobalRequest { name } => {
                tracing::debug!("Discarding global request {:?} from {}", name, self.peer);
            }
        }
    }

    fn open_channel(&mut self, open: ChannelOpen) {
        let ChannelOpen {
            kind,
            sink,
            respond,
        } = open;

        let decision = if kind != SESSION_CHANNEL {
            Err(OpenFailure::UnknownChannelType(kind))
        } else if self
            .max_channels
            .is_some_and(|max| self.controllers.len() >= max)
        {
            Err(OpenFailure::ResourceShortage)
        } else {
            Ok(self.spawn_controller(sink))
        };

        if let Err(failure) = &decision {
            tracing::warn!("Rejecting channel from {}: {}", self.peer, failure);
        }

        // A dropped receiver drops the ports, which ends the new controller
        let _ = respond.send(decision);
    }

    fn spawn_controller(&mut self, sink: Arc<dyn ChannelSink>) -> ChannelPorts {
        let label = format!("{}#{}", self.peer, self.opened);
        self.opened += 1;

        let (ports, inbox) = session::channel();
        let controller = ChannelSession::new(label, Arc::clone(&self.settings), sink);
        self.controllers
            .spawn(controller.run(inbox, self.shutdown.child_token()));

        ports
    }

    fn reap(joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!("Channel controller panicked: {}", e);
            }
        }
    }
}
