//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding a request payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload ended before a field was complete
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string field was not valid UTF-8
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    /// The payload was expected to be empty
    #[error("Unexpected payload of {0} bytes")]
    UnexpectedPayload(usize),
}
