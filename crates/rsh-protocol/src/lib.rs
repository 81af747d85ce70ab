//! rsh-protocol: Channel request vocabulary for the rsh server
//!
//! This crate defines the typed channel requests a session channel carries
//! and the binary payload encoding they use: big-endian integers and
//! 4-byte length-prefixed strings, as in the SSH connection protocol.

pub mod error;
pub mod message;
pub mod request;
pub mod wire;

pub use error::ProtocolError;
pub use message::{ExecRequest, PtyRequest, TerminalSize, WindowChange};
pub use request::{ChannelRequest, RequestKind};
pub use wire::{WireReader, WireWriter};
