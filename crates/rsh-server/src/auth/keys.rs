//! Authorized keys files

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::PublicKey;

use rsh_core::config::expand_home;

/// Fingerprints of the public keys allowed to log in
#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    fingerprints: HashSet<String>,
}

impl AuthorizedKeys {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every file in `paths` that exists; `~` is expanded
    pub fn load_from_files(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut store = Self::new();

        for path in paths {
            let expanded = expand_home(path.as_ref());
            if expanded.exists() {
                store.load_from_file(&expanded)?;
            } else {
                tracing::warn!("Authorized keys file not found: {:?}", expanded);
            }
        }

        Ok(store)
    }

    /// Load one authorized_keys file. Lines that do not parse are skipped.
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize> {
        tracing::info!("Loading authorized keys from {:?}", path);

        let file =
            std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;

        let mut count = 0;
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read line {} of {:?}", line_num + 1, path))?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_key_line(line) {
                Some(key) => {
                    let fingerprint = key.fingerprint();
                    tracing::debug!("Loaded key {}", fingerprint);
                    self.fingerprints.insert(fingerprint);
                    count += 1;
                }
                None => {
                    tracing::warn!("Failed to parse key on line {} of {:?}", line_num + 1, path);
                }
            }
        }

        tracing::info!("Loaded {} authorized keys from {:?}", count, path);
        Ok(count)
    }

    /// Check if a key fingerprint is authorized
    pub fn is_authorized(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Authorize a public key
    pub fn add_key(&mut self, key: &PublicKey) {
        self.fingerprints.insert(key.fingerprint());
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Parse `[options] type base64 [comment]`, or a bare base64 blob
fn parse_key_line(line: &str) -> Option<PublicKey> {
    if let Ok(key) = russh_keys::parse_public_key_base64(line) {
        return Some(key);
    }

    // The key blob is the field after the key type; options may precede it
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields
        .windows(2)
        .find(|pair| is_key_type(pair[0]))
        .and_then(|pair| russh_keys::parse_public_key_base64(pair[1]).ok())
}

fn is_key_type(field: &str) -> bool {
    field.starts_with("ssh-") || field.starts_with("ecdsa-") || field.starts_with("sk-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_keys::key::KeyPair;
    use russh_keys::PublicKeyBase64;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn generated_key() -> PublicKey {
        KeyPair::generate_ed25519()
            .unwrap()
            .clone_public_key()
            .unwrap()
    }

    #[test]
    fn test_load_authorized_keys() {
        let key = generated_key();
        let other = generated_key();
        let mut file = NamedTempFile::new().unwrap();

        writeln!(file, "# Comment line").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "ssh-ed25519 {} user@example.com", key.public_key_base64()).unwrap();
        writeln!(
            file,
            "no-pty,from=\"10.0.0.1\" ssh-ed25519 {}",
            other.public_key_base64()
        )
        .unwrap();
        writeln!(file, "ssh-ed25519 not-base64").unwrap();

        let mut store = AuthorizedKeys::new();
        let count = store.load_from_file(file.path()).unwrap();

        assert_eq!(count, 2);
        assert!(store.is_authorized(&key.fingerprint()));
        assert!(store.is_authorized(&other.fingerprint()));
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let store = AuthorizedKeys::load_from_files(&["/nonexistent/authorized_keys"]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_is_authorized() {
        let key = generated_key();
        let mut store = AuthorizedKeys::new();
        store.add_key(&key);

        assert_eq!(store.len(), 1);
        assert!(store.is_authorized(&key.fingerprint()));
        assert!(!store.is_authorized("SHA256:other"));
    }
}
