//! SSH server listener
//!
//! Accepts incoming connections and runs a handler and a supervisor for
//! each client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::MethodSet;
use russh_keys::key::KeyPair;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use rsh_core::config::{ServerConfig, SessionSettings};
use rsh_core::traits::CredentialCheck;

use crate::server::handler::ConnectionHandler;
use crate::supervisor::{ConnectionEvent, ConnectionSupervisor};

/// Pending connection events per connection
const EVENT_QUEUE_DEPTH: usize = 64;

/// Build the russh configuration for `host_key`
pub fn ssh_config(host_key: KeyPair, config: &ServerConfig) -> russh::server::Config {
    let mut ssh = russh::server::Config::default();
    ssh.keys.push(host_key);
    ssh.methods = MethodSet::PASSWORD | MethodSet::PUBLICKEY;
    ssh.auth_rejection_time = config.auth_rejection_delay;
    ssh.auth_rejection_time_initial = Some(Duration::from_secs(0));
    ssh
}

/// SSH server that listens for incoming connections
pub struct SshServer {
    /// russh server configuration
    ssh_config: Arc<russh::server::Config>,
    /// Credential predicate shared by all connections
    credentials: Arc<dyn CredentialCheck>,
    /// Settings for every session channel
    settings: Arc<SessionSettings>,
    /// Channel limit per connection
    max_channels: Option<usize>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl SshServer {
    /// Create a new SSH server
    pub fn new(
        host_key: KeyPair,
        config: &ServerConfig,
        credentials: Arc<dyn CredentialCheck>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ssh_config: Arc::new(ssh_config(host_key, config)),
            credentials,
            settings: Arc::new(config.session.clone()),
            max_channels: config.max_channels_per_connection,
            cancel,
        }
    }

    /// Run the SSH server until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until cancelled.
    ///
    /// On shutdown every open channel is torn down before this returns.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                // Check for shutdown
                _ = self.cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            connections.spawn(self.handle_connection(socket, peer_addr));
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        if !connections.is_empty() {
            tracing::info!("Waiting for {} connections to close", connections.len());
        }
        while connections.join_next().await.is_some() {}

        Ok(())
    }

    /// Serve one connection: transport handler plus channel supervisor
    fn handle_connection(
        &self,
        socket: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        tracing::info!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.ssh_config);
        let credentials = Arc::clone(&self.credentials);
        let cancel = self.cancel.child_token();
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(EVENT_QUEUE_DEPTH);

        let supervisor = ConnectionSupervisor::new(
            peer_addr.to_string(),
            Arc::clone(&self.settings),
            self.max_channels,
            cancel.clone(),
        );

        async move {
            let supervisor = tokio::spawn(supervisor.run(event_rx));
            let handler = ConnectionHandler::new(peer_addr, credentials, event_tx);

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection handler cancelled for {}", peer_addr);
                    Ok(())
                }
                result = async {
                    russh::server::run_stream(config, socket, handler).await?.await
                } => result
            };

            match result {
                Ok(()) => {
                    tracing::info!("Connection from {} closed normally", peer_addr);
                }
                Err(e) => {
                    tracing::warn!("Connection from {} closed with error: {}", peer_addr, e);
                }
            }

            // The handler is gone, so every channel's request stream has ended
            if let Err(e) = supervisor.await {
                tracing::error!("Supervisor for {} failed: {}", peer_addr, e);
            }
        }
    }
}

/// Load the host key, generating and persisting an Ed25519 key if missing
pub async fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        tracing::info!("Loading host key from {:?}", path);
        let key = russh_keys::load_secret_key(path, None)
            .with_context(|| format!("Failed to load host key from {:?}", path))?;
        return Ok(key);
    }

    tracing::info!("Generating new host key at {:?}", path);

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let key = KeyPair::generate_ed25519()
        .ok_or_else(|| anyhow::anyhow!("Failed to generate Ed25519 key"))?;

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).context("Failed to encode host key")?;
    tokio::fs::write(path, &pem)
        .await
        .with_context(|| format!("Failed to write host key to {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to restrict permissions on {:?}", path))?;
    }

    Ok(key)
}
