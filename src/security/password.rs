//! Passphrase hashing.
//!
//! Each passphrase gets a fresh 16-byte salt that is stored next to the
//! hash. The base64 salt is appended to the passphrase and the result is
//! fed to bcrypt at the configured cost, so stored rows are
//! `(bcrypt string as UTF-8 bytes, raw salt bytes)`.

use crate::config::PasswordConfig;
use crate::error::{Error, Result};
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

/// Salt byte length.
pub const SALT_BYTES: usize = 16;

/// Lowest bcrypt cost accepted.
pub const MIN_WORK_FACTOR: u32 = 4;

/// Highest bcrypt cost accepted.
pub const MAX_WORK_FACTOR: u32 = 31;

/// bcrypt ignores input past this many bytes.
pub const BCRYPT_MAX_INPUT_BYTES: usize = 72;

/// Longest passphrase (in UTF-8 bytes) whose salted input fits bcrypt
/// without truncation: 72 minus the 24-character base64 salt.
pub const MAX_PASSPHRASE_BYTES: usize = BCRYPT_MAX_INPUT_BYTES - 24;

/// Stored hash + salt for one account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    hash: Vec<u8>,
    salt: Vec<u8>,
}

impl Credential {
    /// Rebuild a credential from the two stored blobs.
    pub fn from_parts(hash: Vec<u8>, salt: Vec<u8>) -> Self {
        Self { hash, salt }
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.hash, self.salt)
    }
}

// Never print hash or salt bytes.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Credential {{ hash: <{} bytes>, salt: <{} bytes> }}",
            self.hash.len(),
            self.salt.len()
        )
    }
}

/// bcrypt-based passphrase hasher with a fixed work factor.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    work_factor: u32,
}

impl CredentialHasher {
    /// Create a hasher. Fails with `Configuration` outside `4..=31`.
    pub fn new(work_factor: u32) -> Result<Self> {
        if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&work_factor) {
            return Err(Error::config(format!(
                "password work factor {work_factor} out of range ({MIN_WORK_FACTOR}..={MAX_WORK_FACTOR})"
            )));
        }
        Ok(Self { work_factor })
    }

    pub fn from_config(config: &PasswordConfig) -> Result<Self> {
        let work_factor = config
            .work_factor
            .ok_or_else(|| Error::config("password.work_factor is not set"))?;
        Self::new(work_factor)
    }

    pub fn work_factor(&self) -> u32 {
        self.work_factor
    }

    /// Hash a passphrase under a freshly generated salt.
    ///
    /// Two calls with the same passphrase never return the same salt, and
    /// therefore never the same hash.
    ///
    /// Passphrases longer than [`MAX_PASSPHRASE_BYTES`] are rejected with
    /// `Validation`: bcrypt would drop the salt and the passphrase tail.
    pub fn hash(&self, passphrase: &str) -> Result<Credential> {
        if passphrase.len() > MAX_PASSPHRASE_BYTES {
            return Err(Error::validation(format!(
                "passphrase too long (max {MAX_PASSPHRASE_BYTES} bytes)"
            )));
        }

        let mut salt = vec![0u8; SALT_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let salted = salted_input(passphrase, &salt);
        debug_assert!(salted.len() <= BCRYPT_MAX_INPUT_BYTES);
        let hash = bcrypt::hash(salted.as_bytes(), self.work_factor)
            .map_err(|e| Error::validation(format!("passphrase cannot be hashed: {e}")))?;

        Ok(Credential {
            hash: hash.into_bytes(),
            salt,
        })
    }

    /// Check a passphrase against a stored hash and salt.
    ///
    /// Returns `false` on any mismatch, including a stored hash that is not
    /// a valid bcrypt string. The digest comparison is constant-time.
    /// No length limit here, so rows written elsewhere with longer
    /// passphrases still verify.
    pub fn verify(&self, passphrase: &str, stored_hash: &[u8], stored_salt: &[u8]) -> bool {
        let Ok(stored) = std::str::from_utf8(stored_hash) else {
            tracing::warn!("Stored password hash is not valid UTF-8");
            return false;
        };

        let salted = salted_input(passphrase, stored_salt);
        match bcrypt::verify(salted.as_bytes(), stored) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                false
            }
        }
    }

    /// [`verify`](Self::verify) against a [`Credential`].
    pub fn verify_credential(&self, passphrase: &str, credential: &Credential) -> bool {
        self.verify(passphrase, credential.hash(), credential.salt())
    }
}

/// `passphrase || base64(salt)`, wiped on drop.
fn salted_input(passphrase: &str, salt: &[u8]) -> Zeroizing<String> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(salt);
    let mut salted = Zeroizing::new(String::with_capacity(passphrase.len() + encoded.len()));
    salted.push_str(passphrase);
    salted.push_str(&encoded);
    salted
}
