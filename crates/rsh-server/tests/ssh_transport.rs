//! SSH transport integration tests
//!
//! Runs a real [`SshServer`] on a loopback port and talks to it with a
//! russh client, so replies, channel opens and exit statuses are checked as
//! a peer sees them on the wire.

#![cfg(unix)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use rsh_core::config::{ServerConfig, UserCredential};
use rsh_server::auth::CredentialStore;
use rsh_server::server::SshServer;

/// Upper bound for anything a test waits on
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER: &str = "alice";
const PASSWORD: &str = "correct horse";

struct TrustingClient;

#[async_trait]
impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct TestServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = ServerConfig::default();
        config.authorized_keys = Vec::new();
        config.auth_rejection_delay = Duration::from_secs(0);
        config.users = vec![UserCredential {
            name: USER.to_string(),
            password: Some(PASSWORD.to_string()),
            password_sha256: None,
        }];
        config.session.shell_candidates = vec![PathBuf::from("/bin/sh")];
        config.session.login_shell = false;

        let credentials = Arc::new(CredentialStore::from_config(&config).unwrap());
        let host_key = KeyPair::generate_ed25519().unwrap();
        let cancel = CancellationToken::new();
        let server = SshServer::new(host_key, &config, credentials, cancel.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move { server.serve(listener).await });

        Self { addr, cancel, task }
    }

    async fn connect(&self) -> client::Handle<TrustingClient> {
        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, self.addr, TrustingClient)
            .await
            .unwrap();
        assert!(session.authenticate_password(USER, PASSWORD).await.unwrap());
        session
    }

    async fn stop(self) {
        self.cancel.cancel();
        timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .unwrap();
    }
}

/// What a client observed on one channel, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Success,
    Failure,
    Data(Vec<u8>),
    Stderr(Vec<u8>),
    Eof,
    ExitStatus(u32),
    Close,
}

#[derive(Debug, Default)]
struct Transcript(Vec<Seen>);

impl Transcript {
    fn count(&self, wanted: &Seen) -> usize {
        self.0.iter().filter(|seen| *seen == wanted).count()
    }

    fn replies(&self) -> Vec<bool> {
        self.0
            .iter()
            .filter_map(|seen| match seen {
                Seen::Success => Some(true),
                Seen::Failure => Some(false),
                _ => None,
            })
            .collect()
    }

    fn stdout(&self) -> String {
        let bytes: Vec<u8> = self
            .0
            .iter()
            .filter_map(|seen| match seen {
                Seen::Data(data) => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn stderr(&self) -> String {
        let bytes: Vec<u8> = self
            .0
            .iter()
            .filter_map(|seen| match seen {
                Seen::Stderr(data) => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn exit_statuses(&self) -> Vec<u32> {
        self.0
            .iter()
            .filter_map(|seen| match seen {
                Seen::ExitStatus(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    fn position(&self, matches: impl Fn(&Seen) -> bool) -> Option<usize> {
        self.0.iter().position(matches)
    }

    fn last_position(&self, matches: impl Fn(&Seen) -> bool) -> Option<usize> {
        self.0.iter().rposition(matches)
    }
}

fn record(transcript: &mut Transcript, msg: ChannelMsg) {
    let seen = match msg {
        ChannelMsg::Success => Seen::Success,
        ChannelMsg::Failure => Seen::Failure,
        ChannelMsg::Data { data } => Seen::Data(data.to_vec()),
        ChannelMsg::ExtendedData { data, ext: 1 } => Seen::Stderr(data.to_vec()),
        ChannelMsg::Eof => Seen::Eof,
        ChannelMsg::ExitStatus { exit_status } => Seen::ExitStatus(exit_status),
        ChannelMsg::Close => Seen::Close,
        _ => return,
    };
    transcript.0.push(seen);
}

/// Read until the server closes the channel
async fn read_to_close(channel: &mut Channel<client::Msg>) -> Transcript {
    let mut transcript = Transcript::default();
    let finished = timeout(TEST_TIMEOUT, async {
        while let Some(msg) = channel.wait().await {
            let closed = matches!(msg, ChannelMsg::Close);
            record(&mut transcript, msg);
            if closed {
                break;
            }
        }
    })
    .await;
    assert!(finished.is_ok(), "channel not closed: {:?}", transcript);
    transcript
}

/// Read until `count` replies have arrived
async fn read_replies(channel: &mut Channel<client::Msg>, count: usize) -> Transcript {
    let mut transcript = Transcript::default();
    let finished = timeout(TEST_TIMEOUT, async {
        while transcript.replies().len() < count {
            match channel.wait().await {
                Some(msg) => record(&mut transcript, msg),
                None => break,
            }
        }
    })
    .await;
    assert!(finished.is_ok(), "replies missing: {:?}", transcript);
    transcript
}

#[tokio::test]
async fn test_pipelined_pty_and_exec_both_answered() {
    let server = TestServer::start().await;
    let session = server.connect().await;
    let mut channel = session.channel_open_session().await.unwrap();

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    channel.exec(true, "echo hi").await.unwrap();
    let transcript = read_to_close(&mut channel).await;

    assert_eq!(transcript.replies(), vec![true, true]);
    assert_eq!(transcript.stdout(), "hi\n");
    assert_eq!(transcript.exit_statuses(), vec![0]);
    // Both replies precede any output
    let last_reply = transcript
        .last_position(|seen| matches!(seen, Seen::Success))
        .unwrap();
    let first_data = transcript
        .position(|seen| matches!(seen, Seen::Data(_)))
        .unwrap();
    assert!(last_reply < first_data);

    server.stop().await;
}

#[tokio::test]
async fn test_env_without_reply_does_not_take_exec_reply() {
    let server = TestServer::start().await;
    let session = server.connect().await;
    let mut channel = session.channel_open_session().await.unwrap();

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    channel.set_env(false, "LANG", "C").await.unwrap();
    channel.exec(true, "echo hi").await.unwrap();
    let transcript = read_to_close(&mut channel).await;

    assert_eq!(transcript.replies(), vec![true, true]);
    assert_eq!(transcript.stdout(), "hi\n");

    server.stop().await;
}

#[tokio::test]
async fn test_pipelined_pty_and_shell_both_answered() {
    let server = TestServer::start().await;
    let session = server.connect().await;
    let mut channel = session.channel_open_session().await.unwrap();

    channel
        .request_pty(true, "xterm", 100, 30, 0, 0, &[])
        .await
        .unwrap();
    channel.request_shell(true).await.unwrap();
    let replies = read_replies(&mut channel, 2).await;
    assert_eq!(replies.replies(), vec![true, true]);

    channel.data(&b"stty size; exit 4\n"[..]).await.unwrap();
    let transcript = read_to_close(&mut channel).await;

    assert!(
        transcript.stdout().contains("30 100"),
        "unexpected output: {:?}",
        transcript.stdout()
    );
    assert_eq!(transcript.exit_statuses(), vec![4]);

    server.stop().await;
}

#[tokio::test]
async fn test_second_run_request_gets_failure() {
    let server = TestServer::start().await;
    let session = server.connect().await;
    let mut channel = session.channel_open_session().await.unwrap();

    channel.exec(true, "sleep 1; exit 2").await.unwrap();
    channel.exec(true, "exit 9").await.unwrap();
    let transcript = read_to_close(&mut channel).await;

    assert_eq!(transcript.replies(), vec![true, false]);
    assert_eq!(transcript.exit_statuses(), vec![2]);

    server.stop().await;
}

#[tokio::test]
async fn test_exit_status_follows_output() {
    let server = TestServer::start().await;
    let session = server.connect().await;
    let mut channel = session.channel_open_session().await.unwrap();

    channel
        .exec(true, "printf out; printf err >&2; exit 3")
        .await
        .unwrap();
    let transcript = read_to_close(&mut channel).await;

    assert_eq!(transcript.stdout(), "out");
    assert_eq!(transcript.stderr(), "err");
    assert_eq!(transcript.exit_statuses(), vec![3]);
    assert_eq!(transcript.count(&Seen::Eof), 1);

    let last_output = transcript
        .last_position(|seen| matches!(seen, Seen::Data(_) | Seen::Stderr(_)))
        .unwrap();
    let eof = transcript.position(|seen| *seen == Seen::Eof).unwrap();
    let status = transcript
        .position(|seen| matches!(seen, Seen::ExitStatus(_)))
        .unwrap();
    let close = transcript.position(|seen| *seen == Seen::Close).unwrap();
    assert!(last_output < eof && eof < status && status < close);

    server.stop().await;
}

#[tokio::test]
async fn test_non_utf8_exec_command_runs() {
    let server = TestServer::start().await;
    let session = server.connect().await;
    let mut channel = session.channel_open_session().await.unwrap();

    channel
        .exec(true, &b"printf '\xff' >/dev/null; exit 3"[..])
        .await
        .unwrap();
    let transcript = read_to_close(&mut channel).await;

    assert_eq!(transcript.replies(), vec![true]);
    assert_eq!(transcript.exit_statuses(), vec![3]);

    server.stop().await;
}

#[tokio::test]
async fn test_non_session_channel_refused() {
    let server = TestServer::start().await;
    let session = server.connect().await;

    let refused = session
        .channel_open_direct_tcpip("127.0.0.1", 22, "127.0.0.1", 40000)
        .await;
    assert!(
        matches!(refused, Err(russh::Error::ChannelOpenFailure(_))),
        "unexpected result: {:?}",
        refused.map(|_| ())
    );

    // The connection keeps serving session channels
    let mut channel = session.channel_open_session().await.unwrap();
    channel.exec(true, "exit 6").await.unwrap();
    let transcript = read_to_close(&mut channel).await;
    assert_eq!(transcript.exit_statuses(), vec![6]);

    server.stop().await;
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let server = TestServer::start().await;
    let config = Arc::new(client::Config::default());
    let mut session = client::connect(config, server.addr, TrustingClient)
        .await
        .unwrap();

    assert!(!session.authenticate_password(USER, "wrong").await.unwrap());

    server.stop().await;
}
