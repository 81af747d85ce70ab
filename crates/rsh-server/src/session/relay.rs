//! Byte relays between a channel and a child's streams
//!
//! Output relays (child to peer) run in a [`JoinSet`] so the controller can
//! wait for all of them to reach end-of-stream before it reports the exit
//! status. The input relay (peer to child) runs on its own and is aborted
//! once the output side is done.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use rsh_core::traits::{ChannelSink, EXTENDED_DATA_STDERR};

use crate::process::ProcessIo;

/// Read buffer size for every relay
const RELAY_BUFFER_SIZE: usize = 8192;

/// Chunks buffered between the blocking PTY reader and the async forwarder
const TERMINAL_QUEUE_DEPTH: usize = 32;

/// The relay tasks of one running process
pub struct Relays {
    label: String,
    outputs: JoinSet<()>,
    input: Option<JoinHandle<()>>,
    failed: CancellationToken,
}

impl Relays {
    /// Start relaying between `io` and the channel.
    ///
    /// `input` carries the peer's data chunks; when its sender is dropped the
    /// child's input stream is closed.
    pub fn start(
        label: String,
        io: ProcessIo,
        sink: Arc<dyn ChannelSink>,
        input: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        let failed = CancellationToken::new();
        let mut outputs = JoinSet::new();

        let input = match io {
            ProcessIo::Piped {
                stdin,
                stdout,
                stderr,
            } => {
                outputs.spawn(relay_output(
                    label.clone(),
                    stdout,
                    None,
                    Arc::clone(&sink),
                    failed.clone(),
                ));
                outputs.spawn(relay_output(
                    label.clone(),
                    stderr,
                    Some(EXTENDED_DATA_STDERR),
                    Arc::clone(&sink),
                    failed.clone(),
                ));
                tokio::spawn(relay_input(label.clone(), input, stdin))
            }
            ProcessIo::Terminal { reader, writer } => {
                let (tx, rx) = mpsc::channel(TERMINAL_QUEUE_DEPTH);
                spawn_terminal_reader(label.clone(), reader, tx);
                outputs.spawn(forward_terminal_output(
                    label.clone(),
                    rx,
                    Arc::clone(&sink),
                    failed.clone(),
                ));
                tokio::spawn(relay_terminal_input(label.clone(), input, writer))
            }
        };

        tracing::debug!("Started relays for {}", label);

        Self {
            label,
            outputs,
            input: Some(input),
            failed,
        }
    }

    /// Resolves once an output relay could not deliver to the peer
    pub async fn failed(&self) {
        self.failed.cancelled().await
    }

    /// Wait for every output relay to reach end-of-stream, then stop the
    /// input relay. Returns `false` if `timeout` elapsed first, in which
    /// case the remaining output relays are aborted.
    pub async fn drain(&mut self, timeout: Duration) -> bool {
        let outputs = &mut self.outputs;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = outputs.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("Output relay panicked: {}", e);
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                "Output of {} not drained within {:?}, dropping the rest",
                self.label,
                timeout
            );
        }

        self.abort();
        drained
    }

    /// Stop all relays immediately
    pub fn abort(&mut self) {
        self.outputs.abort_all();
        if let Some(input) = self.input.take() {
            input.abort();
        }
    }
}

impl Drop for Relays {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn relay_output<R>(
    label: String,
    mut reader: R,
    extended: Option<u32>,
    sink: Arc<dyn ChannelSink>,
    failed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Output stream of {} ended: {}", label, e);
                break;
            }
        };

        tracing::trace!("Relaying {} bytes from {}", n, label);
        let sent = match extended {
            None => sink.data(&buf[..n]).await,
            Some(code) => sink.extended_data(code, &buf[..n]).await,
        };

        if let Err(e) = sent {
            tracing::warn!("Failed to relay output of {}: {}", label, e);
            failed.cancel();
            break;
        }
    }
}

async fn relay_input<W>(label: String, mut input: mpsc::UnboundedReceiver<Bytes>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = input.recv().await {
        tracing::trace!("Relaying {} bytes to {}", chunk.len(), label);
        if let Err(e) = writer.write_all(&chunk).await {
            tracing::debug!("Input stream of {} closed: {}", label, e);
            return;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!("Input stream of {} closed: {}", label, e);
            return;
        }
    }

    // Peer sent EOF; closing our end gives the child EOF too
    let _ = writer.shutdown().await;
    tracing::debug!("Input of {} closed by peer", label);
}

/// Blocking reader on the terminal's controlling side.
///
/// Ends on end-of-stream (the subordinate side was closed by every process
/// holding it) or once the forwarder has gone away.
fn spawn_terminal_reader(
    label: String,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<Bytes>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; RELAY_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("PTY reader EOF for {}", label);
                    break;
                }
                Ok(n) => {
                    if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        tracing::debug!("PTY output forwarder gone for {}", label);
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO once the subordinate side is closed on Linux
                    tracing::debug!("PTY reader closed for {}: {}", label, e);
                    break;
                }
            }
        }
    });
}

async fn forward_terminal_output(
    label: String,
    mut rx: mpsc::Receiver<Bytes>,
    sink: Arc<dyn ChannelSink>,
    failed: CancellationToken,
) {
    while let Some(chunk) = rx.recv().await {
        tracing::trace!("Relaying {} bytes from PTY of {}", chunk.len(), label);
        if let Err(e) = sink.data(&chunk).await {
            tracing::warn!("Failed to relay PTY output of {}: {}", label, e);
            failed.cancel();
            break;
        }
    }
}

async fn relay_terminal_input(
    label: String,
    mut input: mpsc::UnboundedReceiver<Bytes>,
    writer: Box<dyn Write + Send>,
) {
    let mut writer = Some(writer);

    while let Some(chunk) = input.recv().await {
        let Some(mut w) = writer.take() else {
            break;
        };

        let written = tokio::task::spawn_blocking(move || {
            let result = w.write_all(&chunk).and_then(|_| w.flush());
            (w, result)
        })
        .await;

        match written {
            Ok((w, Ok(()))) => writer = Some(w),
            Ok((_, Err(e))) => {
                tracing::debug!("PTY input of {} closed: {}", label, e);
                return;
            }
            Err(e) => {
                tracing::error!("PTY writer task for {} failed: {}", label, e);
                return;
            }
        }
    }

    // Dropping the writer sends the terminal's EOF character
    tracing::debug!("Input of {} closed by peer", label);
    drop(writer);
}
