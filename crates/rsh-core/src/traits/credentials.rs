//! Credential verification

/// Binary accept/reject decision for an authentication attempt.
///
/// The transport calls this before any channel of the connection reaches
/// the session core.
pub trait CredentialCheck: Send + Sync {
    /// Verify a username/password pair
    fn check_password(&self, user: &str, password: &str) -> bool;

    /// Verify that a public key (by fingerprint) may log in as `user`
    fn check_public_key(&self, user: &str, fingerprint: &str) -> bool;
}
