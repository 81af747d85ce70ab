//! Credential store
//!
//! Password users come from the server configuration; public keys from the
//! configured authorized_keys files. A listed key may log in as any user.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use rsh_core::config::{ServerConfig, UserCredential};
use rsh_core::error::ConfigError;
use rsh_core::traits::CredentialCheck;

use super::keys::AuthorizedKeys;

type PasswordDigest = [u8; 32];

/// Users and keys allowed to log in
#[derive(Debug, Default)]
pub struct CredentialStore {
    /// SHA-256 of each user's password
    passwords: HashMap<String, PasswordDigest>,
    keys: AuthorizedKeys,
}

impl CredentialStore {
    /// Create a store with no password users
    pub fn new(keys: AuthorizedKeys) -> Self {
        Self {
            passwords: HashMap::new(),
            keys,
        }
    }

    /// Build the store described by the server configuration
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let keys = AuthorizedKeys::load_from_files(&config.authorized_keys)?;
        let mut store = Self::new(keys);

        for user in &config.users {
            store
                .add_user(user)
                .with_context(|| format!("Invalid credentials for user {:?}", user.name))?;
        }

        if store.passwords.is_empty() && store.keys.is_empty() {
            tracing::warn!("No users or authorized keys configured - all logins will be rejected");
        } else {
            tracing::info!(
                "Loaded {} password users and {} authorized keys",
                store.passwords.len(),
                store.keys.len()
            );
        }

        Ok(store)
    }

    /// Add a password user. A SHA-256 digest wins over a plaintext password.
    pub fn add_user(&mut self, user: &UserCredential) -> Result<()> {
        let digest = match (&user.password_sha256, &user.password) {
            (Some(hex_digest), _) => parse_digest(hex_digest)?,
            (None, Some(password)) => digest(password),
            (None, None) => {
                return Err(ConfigError::MissingField(format!(
                    "password or password_sha256 for user {:?}",
                    user.name
                ))
                .into())
            }
        };

        self.passwords.insert(user.name.clone(), digest);
        Ok(())
    }
}

impl CredentialCheck for CredentialStore {
    fn check_password(&self, user: &str, password: &str) -> bool {
        let offered = digest(password);
        match self.passwords.get(user) {
            Some(expected) => constant_time_eq(expected, &offered),
            None => false,
        }
    }

    fn check_public_key(&self, _user: &str, fingerprint: &str) -> bool {
        self.keys.is_authorized(fingerprint)
    }
}

fn digest(password: &str) -> PasswordDigest {
    Sha256::digest(password.as_bytes()).into()
}

fn parse_digest(hex_digest: &str) -> Result<PasswordDigest> {
    let bytes = hex::decode(hex_digest.trim()).context("password_sha256 is not hex")?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("password_sha256 has {} bytes, expected 32", bytes.len()))
}

fn constant_time_eq(a: &PasswordDigest, b: &PasswordDigest) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
