//! Channel request envelope

use std::fmt;

use bytes::Bytes;

/// Request type tag carried by a channel request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Pseudo-terminal allocation (`pty-req`)
    PtyRequest,
    /// Terminal geometry change (`window-change`)
    WindowChange,
    /// Start the default interactive shell (`shell`)
    Shell,
    /// Run a single command line (`exec`)
    Exec,
    /// Any request type this server does not implement
    Other(String),
}

impl RequestKind {
    /// Map a protocol type tag to a request kind
    pub fn from_name(name: &str) -> Self {
        match name {
            "pty-req" => Self::PtyRequest,
            "window-change" => Self::WindowChange,
            "shell" => Self::Shell,
            "exec" => Self::Exec,
            other => Self::Other(other.to_string()),
        }
    }

    /// Protocol type tag
    pub fn as_str(&self) -> &str {
        match self {
            Self::PtyRequest => "pty-req",
            Self::WindowChange => "window-change",
            Self::Shell => "shell",
            Self::Exec => "exec",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request received on a session channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Request type
    pub kind: RequestKind,
    /// Raw request-specific payload
    pub payload: Bytes,
    /// Whether the peer expects a success/failure reply
    pub want_reply: bool,
}

impl ChannelRequest {
    /// Create a request that expects a reply
    pub fn new(kind: RequestKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            want_reply: true,
        }
    }

    /// Create a one-way request (no reply is sent)
    pub fn notification(kind: RequestKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            want_reply: false,
        }
    }
}
