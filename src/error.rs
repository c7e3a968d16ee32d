//! Error kinds surfaced by the security core.
//!
//! Every low-level cause (bcrypt, cipher, SQLite, base64, TOML) is
//! translated into one of these kinds before it leaves the crate.
//! Denials render uniformly so callers cannot tell sub-cases apart.

use crate::auth::policy::DenialReason;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid work factor, missing or malformed key material, bad config file.
    /// Fatal; surfaces at startup and is never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown username, inactive account or wrong passphrase.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Role mismatch, ownership mismatch, or an inactive/expired session.
    #[error("access denied")]
    AccessDenied(DenialReason),

    /// Malformed input (secret too short, wrong IV length, undecryptable data).
    #[error("validation error: {0}")]
    Validation(String),

    /// A collaborator (user store) could not be reached.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this is an expected, caller-recoverable denial
    /// (as opposed to a configuration or infrastructure fault).
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::InvalidCredentials | Self::AccessDenied(_))
    }

    /// The internal reason behind an `AccessDenied`, for logging.
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::AccessDenied(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denials_render_uniformly() {
        assert_eq!(Error::InvalidCredentials.to_string(), "invalid credentials");
        assert_eq!(
            Error::AccessDenied(DenialReason::RoleMismatch).to_string(),
            "access denied"
        );
        assert_eq!(
            Error::AccessDenied(DenialReason::SessionInactive).to_string(),
            "access denied"
        );
    }

    #[test]
    fn denial_reason_is_inspectable() {
        let err = Error::AccessDenied(DenialReason::OwnershipMismatch);
        assert!(err.is_denial());
        assert_eq!(err.denial_reason(), Some(DenialReason::OwnershipMismatch));
        assert_eq!(Error::validation("x").denial_reason(), None);
        assert!(!Error::config("x").is_denial());
    }
}
