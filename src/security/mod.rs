//! Credential hashing and sensitive-field protection.

pub mod password;
pub mod protector;

pub use password::{Credential, CredentialHasher};
pub use protector::{CipherSuite, ProtectedSecret, SensitiveFieldProtector};
