//! Authentication for incoming connections
//!
//! Passwords are checked against configured users, public keys against
//! authorized_keys files.

mod credentials;
mod keys;

pub use credentials::CredentialStore;
pub use keys::AuthorizedKeys;
