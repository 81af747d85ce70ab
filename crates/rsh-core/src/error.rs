//! Core error types for rsh

use rsh_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::SessionPhase;

/// Top-level error type for the rsh crates
#[derive(Error, Debug)]
pub enum RshError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while handling a single channel request.
///
/// Every variant is recovered locally by rejecting the request; none of
/// them tears down the channel on its own.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Request payload could not be decoded
    #[error("Malformed request payload: {0}")]
    Malformed(#[from] ProtocolError),

    /// Request type is not implemented
    #[error("Unsupported request type: {0}")]
    Unsupported(String),

    /// A command was already started on this channel
    #[error("Channel already {0}")]
    AlreadyStarted(SessionPhase),

    /// Request is not valid in the channel's current phase
    #[error("Request not allowed while {0}")]
    InvalidPhase(SessionPhase),

    /// A shell request carried a command; only the default shell is served
    #[error("Shell requests must not carry a command")]
    UnsupportedCommand,

    /// Pseudo-terminal allocation failed
    #[error("PTY allocation failed: {0}")]
    TerminalAllocation(String),

    /// The channel's input stream is not available to hand to a process
    #[error("Channel input is not connected")]
    InputDetached,

    /// No usable interactive shell was found
    #[error("No usable shell among {0:?}")]
    NoShell(Vec<PathBuf>),

    /// Child process could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the transport when writing to a channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is closed or was never open
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection carrying the channel is gone
    #[error("Connection lost: {0}")]
    Disconnected(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_messages() {
        let err = SessionError::AlreadyStarted(SessionPhase::Running);
        assert_eq!(err.to_string(), "Channel already running");

        let err = SessionError::from(ProtocolError::InvalidUtf8);
        assert!(err.to_string().starts_with("Malformed request payload"));
    }

    #[test]
    fn test_top_level_conversion() {
        let err: RshError = TransportError::ChannelClosed.into();
        assert!(matches!(err, RshError::Transport(TransportError::ChannelClosed)));
    }
}
