//! SSH connection handler
//!
//! Implements the russh server handler for one client connection. The
//! handler authenticates the peer, then turns russh callbacks back into
//! protocol-level [`ChannelRequest`]s and data chunks for the session core.
//! Requests are re-encoded with the rsh-protocol codec so the controller
//! sees the same payloads a peer puts on the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty, Sig};
use russh_keys::key::PublicKey;
use tokio::sync::{mpsc, oneshot};

use rsh_core::traits::{ChannelSink, CredentialCheck};
use rsh_protocol::{ChannelRequest, PtyRequest, RequestKind, TerminalSize, WindowChange, WireWriter};

use super::sink::RusshChannelSink;
use crate::session::ChannelPorts;
use crate::supervisor::{ChannelOpen, ConnectionEvent, SESSION_CHANNEL};

/// Terminal mode list terminator (`TTY_OP_END`)
const TTY_OP_END: u8 = 0;

/// Handler for a single SSH client connection
pub struct ConnectionHandler {
    /// Peer address of the connecting client
    peer_addr: SocketAddr,
    /// Credential predicate
    credentials: Arc<dyn CredentialCheck>,
    /// Events for this connection's supervisor
    events: mpsc::Sender<ConnectionEvent>,
    /// Queues of the accepted session channels
    channels: HashMap<ChannelId, ChannelPorts>,
}

impl ConnectionHandler {
    /// Create a handler feeding `events`
    pub fn new(
        peer_addr: SocketAddr,
        credentials: Arc<dyn CredentialCheck>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            peer_addr,
            credentials,
            events,
            channels: HashMap::new(),
        }
    }

    /// Ask the supervisor whether to accept a channel of type `kind`
    async fn open_channel(&mut self, kind: &str, channel: Channel<Msg>, handle: Handle) -> bool {
        let channel_id = channel.id();
        // Traffic reaches us through the handler callbacks
        drop(channel);

        let sink: Arc<dyn ChannelSink> =
            Arc::new(RusshChannelSink::new(handle, channel_id));
        let (respond, decision) = oneshot::channel();
        let open = ChannelOpen {
            kind: kind.to_string(),
            sink,
            respond,
        };

        if self.events.send(ConnectionEvent::ChannelOpen(open)).await.is_err() {
            tracing::warn!("Supervisor for {} is gone, refusing channel", self.peer_addr);
            return false;
        }

        match decision.await {
            Ok(Ok(ports)) => {
                tracing::debug!("Channel {:?} ({}) accepted for {}", channel_id, kind, self.peer_addr);
                self.channels.insert(channel_id, ports);
                true
            }
            Ok(Err(failure)) => {
                tracing::debug!("Channel {:?} refused: {}", channel_id, failure);
                false
            }
            Err(_) => false,
        }
    }

    /// Forward a request to the channel's controller and answer the peer.
    ///
    /// The decision is awaited inside the russh callback: russh tracks the
    /// peer's want-reply flag of the request being handled, and only a reply
    /// sent before the callback returns is matched to that request. russh
    /// drops the reply if the peer did not ask for one.
    async fn forward(&self, channel: ChannelId, request: ChannelRequest, session: &mut Session) {
        let kind = request.kind.clone();
        let pending = self
            .channels
            .get(&channel)
            .and_then(|ports| ports.send_request(request));

        let decision = match pending {
            Some(pending) => pending.decision().await,
            None => {
                tracing::debug!("{} request on unknown or finished channel {:?}", kind, channel);
                Some(false)
            }
        };

        match decision {
            Some(true) => session.channel_success(channel),
            Some(false) => session.channel_failure(channel),
            None => {}
        }
    }

    fn discard_global(&self, name: &str) {
        let event = ConnectionEvent::GlobalRequest {
            name: name.to_string(),
        };
        if self.events.try_send(event).is_err() {
            tracing::debug!("Dropped global request {:?} from {}", name, self.peer_addr);
        }
    }
}

/// Encode russh's parsed terminal modes back into their wire form
fn encode_modes(modes: &[(Pty, u32)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(modes.len() * 5 + 1);
    for (opcode, value) in modes {
        buf.put_u8(*opcode as u8);
        buf.put_u32(*value);
    }
    buf.put_u8(TTY_OP_END);
    buf.freeze()
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
    }
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.credentials.check_password(user, password) {
            tracing::info!("Password authentication accepted for {} from {}", user, self.peer_addr);
            return Ok(Auth::Accept);
        }

        tracing::warn!("Password rejected for {:?} from {}", user, self.peer_addr);
        Ok(reject())
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint();

        if self.credentials.check_public_key(user, &fingerprint) {
            tracing::info!(
                "Public key {} accepted for {} from {}",
                fingerprint,
                user,
                self.peer_addr
            );
            return Ok(Auth::Accept);
        }

        tracing::warn!(
            "Unknown public key {} for {:?} from {}",
            fingerprint,
            user,
            self.peer_addr
        );
        Ok(reject())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel(SESSION_CHANNEL, channel, session.handle()).await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("direct-tcpip", channel, session.handle()).await)
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("x11", channel, session.handle()).await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let payload = PtyRequest {
            term: term.to_string(),
            size: TerminalSize::from_wire(col_width, row_height),
            pixel_width: pix_width,
            pixel_height: pix_height,
            modes: encode_modes(modes),
        }
        .encode();

        self.forward(
            channel,
            ChannelRequest::new(RequestKind::PtyRequest, payload),
            session,
        )
        .await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let payload = WindowChange {
            size: TerminalSize::from_wire(col_width, row_height),
            pixel_width: pix_width,
            pixel_height: pix_height,
        }
        .encode();

        self.forward(
            channel,
            ChannelRequest::notification(RequestKind::WindowChange, payload),
            session,
        )
        .await;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(
            channel,
            ChannelRequest::new(RequestKind::Shell, Bytes::new()),
            session,
        )
        .await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // russh hands over the raw command bytes
        let mut writer = WireWriter::new();
        writer.put_binary(data);

        self.forward(
            channel,
            ChannelRequest::new(RequestKind::Exec, writer.finish()),
            session,
        )
        .await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let mut writer = WireWriter::new();
        writer.put_string(variable_name).put_string(variable_value);

        self.forward(
            channel,
            ChannelRequest::new(RequestKind::from_name("env"), writer.finish()),
            session,
        )
        .await;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let mut writer = WireWriter::new();
        writer.put_string(name);

        self.forward(
            channel,
            ChannelRequest::new(RequestKind::from_name("subsystem"), writer.finish()),
            session,
        )
        .await;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        single_connection: bool,
        x11_auth_protocol: &str,
        x11_auth_cookie: &str,
        x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let mut writer = WireWriter::new();
        writer
            .put_u32(u32::from(single_connection))
            .put_string(x11_auth_protocol)
            .put_string(x11_auth_cookie)
            .put_u32(x11_screen_number);

        self.forward(
            channel,
            ChannelRequest::new(RequestKind::from_name("x11-req"), writer.finish()),
            session,
        )
        .await;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let mut writer = WireWriter::new();
        writer.put_string(&format!("{:?}", signal));

        self.forward(
            channel,
            ChannelRequest::notification(RequestKind::from_name("signal"), writer.finish()),
            session,
        )
        .await;
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("Received {} bytes on channel {:?}", data.len(), channel);

        let delivered = self
            .channels
            .get(&channel)
            .is_some_and(|ports| ports.send_input(Bytes::copy_from_slice(data)));
        if !delivered {
            tracing::trace!("Dropped {} bytes for channel {:?}", data.len(), channel);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        if let Some(ports) = self.channels.get_mut(&channel) {
            ports.close_input();
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        // Dropping the ports ends the controller's request stream
        self.channels.remove(&channel);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        _address: &str,
        _port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.discard_global("tcpip-forward");
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.discard_global("cancel-tcpip-forward");
        Ok(false)
    }
}
