//! rsh-core: Core abstractions and configuration for rsh
//!
//! This crate provides the error taxonomy, configuration structures, and
//! the transport/credential seams shared by the session core and the SSH
//! transport adapter.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::RshError;
pub use types::{ExitResult, SessionPhase};
