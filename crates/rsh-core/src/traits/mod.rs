//! Core trait definitions

mod channel;
mod credentials;

pub use channel::{ChannelSink, EXTENDED_DATA_STDERR};
pub use credentials::CredentialCheck;
