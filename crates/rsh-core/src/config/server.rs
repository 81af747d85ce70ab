//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::SessionSettings;

/// Configuration for the rsh server daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the SSH server to
    pub bind_address: String,

    /// Path to the host key file
    pub host_key_path: PathBuf,

    /// authorized_keys files consulted for public-key authentication
    pub authorized_keys: Vec<PathBuf>,

    /// Delay before answering a rejected authentication attempt
    #[serde(with = "duration_secs")]
    pub auth_rejection_delay: Duration,

    /// Maximum number of concurrently open session channels per connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_channels_per_connection: Option<usize>,

    /// Users allowed to log in with a password
    pub users: Vec<UserCredential>,

    /// Settings applied to every session channel
    pub session: SessionSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: "0.0.0.0:2222".to_string(),
            host_key_path: config_dir.join("host_key"),
            authorized_keys: vec![PathBuf::from("~/.ssh/authorized_keys")],
            auth_rejection_delay: Duration::from_secs(1),
            max_channels_per_connection: None,
            users: Vec::new(),
            session: SessionSettings::default(),
        }
    }
}

/// Password credential for one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCredential {
    /// Login name
    pub name: String,

    /// Plaintext password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Hex-encoded SHA-256 digest of the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_sha256: Option<String>,
}
