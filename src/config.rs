//! Security configuration.
//!
//! Loaded once at startup from a TOML document and read-only afterwards.
//! The password work factor and the field-encryption key have no defaults:
//! a deployment that forgets them must fail at startup, not run weakly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default inactivity timeout for sessions.
const DEFAULT_SESSION_TIMEOUT_MINUTES: u32 = 30;

/// Default cipher identifier (matches rows written by the desktop client).
pub const DEFAULT_CIPHER: &str = "AES/CBC/PKCS5Padding";

/// Default client label attached to audit events.
pub(crate) const DEFAULT_CLIENT_LABEL: &str = "ems";

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// `[password]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// bcrypt cost (log2 of the round count). Required.
    pub work_factor: Option<u32>,
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity window in minutes; must be positive.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
        }
    }
}

impl SessionConfig {
    /// The inactivity window as a `Duration`.
    pub fn timeout(&self) -> Result<Duration> {
        if self.timeout_minutes == 0 {
            return Err(Error::config("session.timeout_minutes must be positive"));
        }
        Ok(Duration::from_secs(u64::from(self.timeout_minutes) * 60))
    }
}

/// How the searchable lookup digest is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupHashMode {
    /// Unkeyed SHA-256. Compatible with existing lookup columns, but
    /// open to offline dictionary attack if the store leaks.
    #[default]
    Sha256,
    /// HMAC-SHA256 under `lookup_key`. Not compatible with digests
    /// written in `sha256` mode.
    HmacSha256,
}

/// `[secrets]` section: sensitive-field protection.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Cipher identifier, e.g. `AES/CBC/PKCS5Padding` or `AES/GCM/NoPadding`.
    #[serde(default = "default_cipher")]
    pub cipher: String,
    /// Base64 AES key (16, 24 or 32 bytes). Required.
    pub key: Option<String>,
    #[serde(default)]
    pub lookup_hash: LookupHashMode,
    /// Base64 HMAC key, required when `lookup_hash = "hmac-sha256"`.
    pub lookup_key: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            cipher: default_cipher(),
            key: None,
            lookup_hash: LookupHashMode::default(),
            lookup_key: None,
        }
    }
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("cipher", &self.cipher)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("lookup_hash", &self.lookup_hash)
            .field("lookup_key", &self.lookup_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Label recorded as the client on every audit event.
    #[serde(default = "default_client_label")]
    pub client_label: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            client_label: default_client_label(),
        }
    }
}

fn default_timeout_minutes() -> u32 {
    DEFAULT_SESSION_TIMEOUT_MINUTES
}

fn default_cipher() -> String {
    DEFAULT_CIPHER.to_string()
}

fn default_client_label() -> String {
    DEFAULT_CLIENT_LABEL.to_string()
}

impl SecurityConfig {
    /// Parse a TOML document. Does not validate; call [`validate`](Self::validate).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("invalid security config: {e}")))
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Security config loaded");
        Ok(config)
    }

    /// Conventional per-user location, e.g. `~/.config/ems/security.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "companyz", "ems")
            .map(|dirs| dirs.config_dir().join("security.toml"))
    }

    /// Check every value by building the components it configures.
    pub fn validate(&self) -> Result<()> {
        crate::security::CredentialHasher::from_config(&self.password)?;
        self.session.timeout()?;
        crate::security::SensitiveFieldProtector::from_config(&self.secrets)?;
        if self.audit.client_label.trim().is_empty() {
            return Err(Error::config("audit.client_label cannot be empty"));
        }
        Ok(())
    }
}
