//! Sensitive-field protection (SSN and similar identifiers).
//!
//! One secret is split three ways:
//! - a deterministic lookup digest for equality search,
//! - an AES ciphertext under a fresh random IV for the privileged reveal path,
//! - the last four characters for display.
//!
//! ## Lookup digest
//! The default digest is plain SHA-256 of the UTF-8 secret, which is what
//! existing lookup columns contain. It is unsalted: with a small input space
//! (nine-digit SSNs) a leaked column can be reversed by brute force. The
//! keyed `hmac-sha256` mode closes that gap but produces different digests,
//! so switching modes requires re-indexing every stored row.
//!
//! ## Cipher suites
//! - `AES/CBC/PKCS5Padding`: PKCS#7 padding, 16-byte IV. Reads rows written
//!   by the desktop client.
//! - `AES/GCM/NoPadding`: 16-byte IV, 128-bit tag appended to the ciphertext.
//!
//! Key length picks AES-128, AES-192 or AES-256.

use crate::config::{LookupHashMode, SecretsConfig};
use crate::error::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, Nonce};
use base64::Engine;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// IV length for every suite (the AES block size).
pub const IV_BYTES: usize = 16;

/// Lookup digest length (SHA-256 / HMAC-SHA256 output).
pub const LOOKUP_HASH_BYTES: usize = 32;

/// Characters kept for display.
const DISPLAY_CHARS: usize = 4;

/// Block cipher mode used for the recoverable ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    AesCbc,
    AesGcm,
}

impl CipherSuite {
    /// Parse a cipher identifier (case-insensitive).
    pub fn parse(identifier: &str) -> Result<Self> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "aes/cbc/pkcs5padding" | "aes/cbc/pkcs7padding" | "aes-cbc" => Ok(Self::AesCbc),
            "aes/gcm/nopadding" | "aes-gcm" => Ok(Self::AesGcm),
            other => Err(Error::config(format!("unsupported cipher identifier '{other}'"))),
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            Self::AesCbc => "AES/CBC/PKCS5Padding",
            Self::AesGcm => "AES/GCM/NoPadding",
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySize {
    Aes128,
    Aes192,
    Aes256,
}

/// AES key bytes, wiped on drop.
struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
    size: KeySize,
}

impl KeyMaterial {
    fn new(bytes: &[u8]) -> Result<Self> {
        let size = match bytes.len() {
            16 => KeySize::Aes128,
            24 => KeySize::Aes192,
            32 => KeySize::Aes256,
            n => {
                return Err(Error::config(format!(
                    "encryption key must be 16, 24 or 32 bytes, got {n}"
                )))
            }
        };
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
            size,
        })
    }
}

/// The stored shape of one protected secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ProtectedSecret {
    /// Last four characters, safe to display.
    pub last4: String,
    /// Deterministic digest for equality search.
    pub lookup_hash: [u8; LOOKUP_HASH_BYTES],
    /// Ciphertext under `iv`.
    pub ciphertext: Vec<u8>,
    /// IV used for this ciphertext only.
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for ProtectedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedSecret")
            .field("last4", &self.last4)
            .field("lookup_hash", &format_args!("<{} bytes>", self.lookup_hash.len()))
            .field("ciphertext", &format_args!("<{} bytes>", self.ciphertext.len()))
            .field("iv", &format_args!("<{} bytes>", self.iv.len()))
            .finish()
    }
}

enum LookupHasher {
    Sha256,
    Keyed(Hmac<Sha256>),
}

impl LookupHasher {
    fn digest(&self, secret: &str) -> [u8; LOOKUP_HASH_BYTES] {
        match self {
            Self::Sha256 => Sha256::digest(secret.as_bytes()).into(),
            Self::Keyed(mac) => {
                let mut mac = mac.clone();
                mac.update(secret.as_bytes());
                mac.finalize().into_bytes().into()
            }
        }
    }
}

/// Derives lookup digest, ciphertext and display truncation from a secret.
pub struct SensitiveFieldProtector {
    suite: CipherSuite,
    key: KeyMaterial,
    lookup: LookupHasher,
}

impl std::fmt::Debug for SensitiveFieldProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitiveFieldProtector")
            .field("suite", &self.suite)
            .field("key_size", &self.key.size)
            .field("keyed_lookup", &matches!(self.lookup, LookupHasher::Keyed(_)))
            .finish()
    }
}

macro_rules! cbc_encrypt {
    ($aes:ty, $key:expr, $iv:expr, $plain:expr) => {
        cbc::Encryptor::<$aes>::new_from_slices($key, $iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>($plain))
            .map_err(|e| e.to_string())
    };
}

macro_rules! cbc_decrypt {
    ($aes:ty, $key:expr, $iv:expr, $data:expr) => {
        cbc::Decryptor::<$aes>::new_from_slices($key, $iv)
            .map_err(|e| e.to_string())
            .and_then(|c| {
                c.decrypt_padded_vec_mut::<Pkcs7>($data)
                    .map_err(|e| e.to_string())
            })
    };
}

macro_rules! gcm_encrypt {
    ($aes:ty, $key:expr, $iv:expr, $plain:expr) => {
        AesGcm::<$aes, U16>::new_from_slice($key)
            .map_err(|e| e.to_string())
            .and_then(|c| {
                c.encrypt(Nonce::<U16>::from_slice($iv), $plain)
                    .map_err(|e| e.to_string())
            })
    };
}

macro_rules! gcm_decrypt {
    ($aes:ty, $key:expr, $iv:expr, $data:expr) => {
        AesGcm::<$aes, U16>::new_from_slice($key)
            .map_err(|e| e.to_string())
            .and_then(|c| {
                c.decrypt(Nonce::<U16>::from_slice($iv), $data)
                    .map_err(|e| e.to_string())
            })
    };
}

impl SensitiveFieldProtector {
    /// Create a protector with raw key bytes and the unkeyed lookup digest.
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self> {
        Ok(Self {
            suite,
            key: KeyMaterial::new(key)?,
            lookup: LookupHasher::Sha256,
        })
    }

    /// Create a protector from a cipher identifier and base64 key material.
    pub fn from_base64(cipher: &str, key_b64: &str) -> Result<Self> {
        let suite = CipherSuite::parse(cipher)?;
        let key = decode_key(key_b64, "secrets.key")?;
        Self::new(suite, &key)
    }

    pub fn from_config(config: &SecretsConfig) -> Result<Self> {
        let key_b64 = config
            .key
            .as_deref()
            .ok_or_else(|| Error::config("secrets.key is not set"))?;
        let protector = Self::from_base64(&config.cipher, key_b64)?;

        match config.lookup_hash {
            LookupHashMode::Sha256 => Ok(protector),
            LookupHashMode::HmacSha256 => {
                let lookup_b64 = config.lookup_key.as_deref().ok_or_else(|| {
                    Error::config("secrets.lookup_key is required for hmac-sha256 lookups")
                })?;
                let lookup_key = decode_key(lookup_b64, "secrets.lookup_key")?;
                protector.with_keyed_lookup(&lookup_key)
            }
        }
    }

    /// Switch the lookup digest to HMAC-SHA256 under `key`.
    ///
    /// Digests produced this way do not match digests from the default mode.
    pub fn with_keyed_lookup(mut self, key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::config("lookup key cannot be empty"));
        }
        let mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| Error::config(format!("invalid lookup key: {e}")))?;
        self.lookup = LookupHasher::Keyed(mac);
        Ok(self)
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Deterministic digest of `secret`, for equality search only.
    pub fn lookup_hash(&self, secret: &str) -> [u8; LOOKUP_HASH_BYTES] {
        self.lookup.digest(secret)
    }

    /// Fresh random IV. Use a new one for every `encrypt` call.
    pub fn generate_iv(&self) -> [u8; IV_BYTES] {
        let mut iv = [0u8; IV_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        iv
    }

    /// Encrypt `secret` under `iv`.
    pub fn encrypt(&self, secret: &str, iv: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_bytes(secret.as_bytes(), iv)
    }

    /// Decrypt a ciphertext produced by [`encrypt`](Self::encrypt) with the same IV.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<String> {
        let plain = Zeroizing::new(self.decrypt_bytes(ciphertext, iv)?);
        String::from_utf8(plain.to_vec())
            .map_err(|_| Error::validation("decrypted secret is not valid UTF-8"))
    }

    /// Last four characters of `secret`.
    pub fn last4(secret: &str) -> Result<String> {
        let count = secret.chars().count();
        if count < DISPLAY_CHARS {
            return Err(Error::validation(format!(
                "secret must be at least {DISPLAY_CHARS} characters"
            )));
        }
        Ok(secret.chars().skip(count - DISPLAY_CHARS).collect())
    }

    /// Compute every stored component of `secret` with a fresh IV.
    pub fn protect(&self, secret: &str) -> Result<ProtectedSecret> {
        let last4 = Self::last4(secret)?;
        let iv = self.generate_iv();
        let ciphertext = self.encrypt(secret, &iv)?;
        Ok(ProtectedSecret {
            last4,
            lookup_hash: self.lookup_hash(secret),
            ciphertext,
            iv: iv.to_vec(),
        })
    }

    /// Recover the plaintext of a protected secret.
    pub fn reveal(&self, protected: &ProtectedSecret) -> Result<String> {
        self.decrypt(&protected.ciphertext, &protected.iv)
    }

    /// Whether `secret` is the one stored in `protected`, by lookup digest only.
    pub fn matches(&self, secret: &str, protected: &ProtectedSecret) -> bool {
        constant_time_eq(&self.lookup_hash(secret), &protected.lookup_hash)
    }

    fn encrypt_bytes(&self, plain: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_iv(iv)?;
        let key = self.key.bytes.as_slice();
        let out = match (self.suite, self.key.size) {
            (CipherSuite::AesCbc, KeySize::Aes128) => cbc_encrypt!(Aes128, key, iv, plain),
            (CipherSuite::AesCbc, KeySize::Aes192) => cbc_encrypt!(Aes192, key, iv, plain),
            (CipherSuite::AesCbc, KeySize::Aes256) => cbc_encrypt!(Aes256, key, iv, plain),
            (CipherSuite::AesGcm, KeySize::Aes128) => gcm_encrypt!(Aes128, key, iv, plain),
            (CipherSuite::AesGcm, KeySize::Aes192) => gcm_encrypt!(Aes192, key, iv, plain),
            (CipherSuite::AesGcm, KeySize::Aes256) => gcm_encrypt!(Aes256, key, iv, plain),
        };
        out.map_err(|e| Error::validation(format!("{} encryption failed: {e}", self.suite)))
    }

    fn decrypt_bytes(&self, data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_iv(iv)?;
        let key = self.key.bytes.as_slice();
        let out = match (self.suite, self.key.size) {
            (CipherSuite::AesCbc, KeySize::Aes128) => cbc_decrypt!(Aes128, key, iv, data),
            (CipherSuite::AesCbc, KeySize::Aes192) => cbc_decrypt!(Aes192, key, iv, data),
            (CipherSuite::AesCbc, KeySize::Aes256) => cbc_decrypt!(Aes256, key, iv, data),
            (CipherSuite::AesGcm, KeySize::Aes128) => gcm_decrypt!(Aes128, key, iv, data),
            (CipherSuite::AesGcm, KeySize::Aes192) => gcm_decrypt!(Aes192, key, iv, data),
            (CipherSuite::AesGcm, KeySize::Aes256) => gcm_decrypt!(Aes256, key, iv, data),
        };
        out.map_err(|_| Error::validation("ciphertext could not be decrypted"))
    }
}

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() != IV_BYTES {
        return Err(Error::validation(format!(
            "IV must be {IV_BYTES} bytes, got {}",
            iv.len()
        )));
    }
    Ok(())
}

fn decode_key(encoded: &str, field: &str) -> Result<Zeroizing<Vec<u8>>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map(Zeroizing::new)
        .map_err(|e| Error::config(format!("{field} is not valid base64: {e}")))
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSN: &str = "123-45-6789";

    fn protector(suite: CipherSuite) -> SensitiveFieldProtector {
        SensitiveFieldProtector::new(suite, &[0u8; 32]).unwrap()
    }

    fn counting_iv() -> [u8; IV_BYTES] {
        let mut iv = [0u8; IV_BYTES];
        for (i, b) in iv.iter_mut().enumerate() {
            *b = i as u8;
        }
        iv
    }

    #[test]
    fn lookup_hash_is_deterministic_sha256() {
        let p = protector(CipherSuite::AesCbc);
        let a = p.lookup_hash(SSN);
        let b = p.lookup_hash(SSN);
        assert_eq!(a, b);
        assert_eq!(
            hex::encode(a),
            "01a54629efb952287e554eb23ef69c52097a75aecc0e3a93ca0855ab6d7a31a0"
        );
        assert_ne!(p.lookup_hash("123-45-6780"), a);
    }

    #[test]
    fn lookup_hash_ignores_key_and_suite() {
        let a = protector(CipherSuite::AesCbc).lookup_hash(SSN);
        let b = SensitiveFieldProtector::new(CipherSuite::AesGcm, &[9u8; 16])
            .unwrap()
            .lookup_hash(SSN);
        assert_eq!(a, b);
    }

    #[test]
    fn keyed_lookup_uses_hmac() {
        let p = protector(CipherSuite::AesCbc)
            .with_keyed_lookup(b"lookup-key")
            .unwrap();
        assert_eq!(
            hex::encode(p.lookup_hash(SSN)),
            "3af9873d411921ffe248f5a74aaa09d13ef1e2bf964d5b6dc9824c82edbcd0d7"
        );
        assert_eq!(p.lookup_hash(SSN), p.lookup_hash(SSN));
        assert!(protector(CipherSuite::AesCbc).with_keyed_lookup(b"").is_err());
    }

    #[test]
    fn fresh_ivs_give_different_ciphertexts() {
        for suite in [CipherSuite::AesCbc, CipherSuite::AesGcm] {
            let p = protector(suite);
            let iv1 = p.generate_iv();
            let iv2 = p.generate_iv();
            assert_ne!(iv1, iv2);
            let c1 = p.encrypt(SSN, &iv1).unwrap();
            let c2 = p.encrypt(SSN, &iv2).unwrap();
            assert_ne!(c1, c2);
            assert_eq!(p.lookup_hash(SSN), p.lookup_hash(SSN));
        }
    }

    #[test]
    fn decrypt_recovers_plaintext_for_every_suite_and_key_size() {
        for suite in [CipherSuite::AesCbc, CipherSuite::AesGcm] {
            for len in [16usize, 24, 32] {
                let p = SensitiveFieldProtector::new(suite, &vec![0x42; len]).unwrap();
                let iv = p.generate_iv();
                for secret in [SSN, "", "주민등록번호 850101-1234567"] {
                    let ct = p.encrypt(secret, &iv).unwrap();
                    assert_eq!(p.decrypt(&ct, &iv).unwrap(), secret);
                }
            }
        }
    }

    #[test]
    fn cbc_matches_reference_vector() {
        let p = protector(CipherSuite::AesCbc);
        let ct = p.encrypt(SSN, &counting_iv()).unwrap();
        assert_eq!(hex::encode(ct), "64ed48d2e3269872e4cda7faa534fbb6");
    }

    #[test]
    fn gcm_matches_reference_vector() {
        let p = protector(CipherSuite::AesGcm);
        let ct = p.encrypt(SSN, &counting_iv()).unwrap();
        assert_eq!(
            hex::encode(ct),
            "9441af67d798d85ff8c24a31f6dbe5afd0457154a66dafd320fb17"
        );
    }

    #[test]
    fn wrong_iv_length_is_validation_error() {
        let p = protector(CipherSuite::AesCbc);
        assert!(matches!(p.encrypt(SSN, &[0u8; 12]), Err(Error::Validation(_))));
        assert!(matches!(p.decrypt(&[0u8; 16], &[0u8; 8]), Err(Error::Validation(_))));
    }

    #[test]
    fn tampered_gcm_ciphertext_is_rejected() {
        let p = protector(CipherSuite::AesGcm);
        let iv = p.generate_iv();
        let mut ct = p.encrypt(SSN, &iv).unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(p.decrypt(&ct, &iv), Err(Error::Validation(_))));
    }

    #[test]
    fn gcm_wrong_key_is_rejected() {
        let p1 = protector(CipherSuite::AesGcm);
        let p2 = SensitiveFieldProtector::new(CipherSuite::AesGcm, &[1u8; 32]).unwrap();
        let iv = p1.generate_iv();
        let ct = p1.encrypt(SSN, &iv).unwrap();
        assert!(p2.decrypt(&ct, &iv).is_err());
    }

    #[test]
    fn cbc_truncated_ciphertext_is_rejected() {
        let p = protector(CipherSuite::AesCbc);
        let iv = p.generate_iv();
        assert!(matches!(p.decrypt(&[1, 2, 3], &iv), Err(Error::Validation(_))));
        assert!(matches!(p.decrypt(&[], &iv), Err(Error::Validation(_))));
    }

    #[test]
    fn last4_returns_trailing_characters() {
        assert_eq!(SensitiveFieldProtector::last4(SSN).unwrap(), "6789");
        assert_eq!(SensitiveFieldProtector::last4("1234").unwrap(), "1234");
        assert_eq!(SensitiveFieldProtector::last4("가나다라마").unwrap(), "나다라마");
    }

    #[test]
    fn last4_rejects_short_secrets() {
        for short in ["", "1", "123"] {
            let err = SensitiveFieldProtector::last4(short).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }

    #[test]
    fn protect_reveal_and_match() {
        let p = protector(CipherSuite::AesCbc);
        let a = p.protect(SSN).unwrap();
        let b = p.protect(SSN).unwrap();

        assert_eq!(a.last4, "6789");
        assert_eq!(a.iv.len(), IV_BYTES);
        assert_eq!(a.lookup_hash, b.lookup_hash);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(p.reveal(&a).unwrap(), SSN);
        assert!(p.matches(SSN, &b));
        assert!(!p.matches("987-65-4321", &b));
    }

    #[test]
    fn protect_rejects_short_secret() {
        let p = protector(CipherSuite::AesGcm);
        assert!(matches!(p.protect("12"), Err(Error::Validation(_))));
    }

    #[test]
    fn cipher_identifiers_parse_case_insensitively() {
        assert_eq!(CipherSuite::parse("AES/CBC/PKCS5Padding").unwrap(), CipherSuite::AesCbc);
        assert_eq!(CipherSuite::parse("aes/gcm/nopadding").unwrap(), CipherSuite::AesGcm);
        assert_eq!(CipherSuite::parse(" aes-gcm ").unwrap(), CipherSuite::AesGcm);
        assert!(matches!(CipherSuite::parse("DES/ECB"), Err(Error::Configuration(_))));
    }

    #[test]
    fn key_material_is_validated() {
        assert!(matches!(
            SensitiveFieldProtector::new(CipherSuite::AesCbc, &[0u8; 20]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            SensitiveFieldProtector::from_base64("AES/CBC/PKCS5Padding", "not base64!!"),
            Err(Error::Configuration(_))
        ));
        let ok = SensitiveFieldProtector::from_base64(
            "AES/GCM/NoPadding",
            "AAAAAAAAAAAAAAAAAAAAAA==",
        )
        .unwrap();
        assert_eq!(ok.suite(), CipherSuite::AesGcm);
    }

    #[test]
    fn debug_output_hides_key_and_ciphertext() {
        let p = protector(CipherSuite::AesCbc);
        let rendered = format!("{p:?}");
        assert!(rendered.contains("AesCbc"));
        let protected = p.protect(SSN).unwrap();
        let rendered = format!("{protected:?}");
        assert!(rendered.contains("6789"));
        assert!(!rendered.contains(SSN));
    }
}
