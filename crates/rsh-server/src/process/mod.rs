//! Child process management

mod exit;
mod runner;

pub use exit::{from_pty_status, from_std_status};
pub use runner::{spawn, CommandSpec, ProcessHandle, ProcessIo, StreamAttachment};
