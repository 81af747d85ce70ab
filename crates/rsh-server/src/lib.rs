//! rsh-server: Remote shell server over SSH
//!
//! Accepts authenticated SSH connections and serves session channels: an
//! interactive shell on a pseudo-terminal or on plain pipes, or a single
//! command run through the system shell. Each connection gets a
//! [`ConnectionSupervisor`]; each session channel gets a [`ChannelSession`]
//! controller owning its terminal and child process.

pub mod auth;
pub mod process;
pub mod pty;
pub mod server;
pub mod session;
pub mod supervisor;

pub use session::ChannelSession;
pub use supervisor::{ConnectionEvent, ConnectionSupervisor};
