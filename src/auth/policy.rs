//! Stateless role and ownership checks against a session.
//!
//! Every check fails closed: an inactive or expired session, a session with
//! no linked resource, or a blank role name is a denial.

use super::role::{Role, HR_ADMIN};
use super::session::SessionState;
use crate::error::{Error, Result};

/// Why a check denied access. Logged, never shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Session expired or invalidated.
    SessionInactive,
    /// Session role differs from the required role.
    RoleMismatch,
    /// Session is linked to a different resource.
    OwnershipMismatch,
    /// Session has no linked resource at all.
    NoLinkedResource,
    /// The check itself was malformed (e.g. blank role name).
    InvalidInput,
}

impl DenialReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::SessionInactive => "session_inactive",
            Self::RoleMismatch => "role_mismatch",
            Self::OwnershipMismatch => "ownership_mismatch",
            Self::NoLinkedResource => "no_linked_resource",
            Self::InvalidInput => "invalid_input",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Role / ownership predicates. Holds no state.
pub struct AccessPolicy;

impl AccessPolicy {
    /// Pass only if the session is active and its role equals `role`
    /// (ASCII case-insensitive).
    pub fn require_role(session: &SessionState, role: &str) -> Result<()> {
        Self::require_active(session)?;
        Self::check_role(session, role)
    }

    /// `require_role(session, "HR_ADMIN")`.
    pub fn require_admin(session: &SessionState) -> Result<()> {
        Self::require_role(session, HR_ADMIN)
    }

    /// Pass only if the session is active and linked to `resource_id`.
    pub fn require_ownership(session: &SessionState, resource_id: i64) -> Result<()> {
        Self::require_active(session)?;
        Self::check_ownership(session, resource_id)
    }

    /// Pass if either the role check or the ownership check passes.
    /// The role is checked first.
    pub fn require_role_or_ownership(
        session: &SessionState,
        role: &str,
        resource_id: i64,
    ) -> Result<()> {
        Self::require_active(session)?;
        if Self::check_role(session, role).is_ok() {
            return Ok(());
        }
        Self::check_ownership(session, resource_id)
    }

    /// The resource the session is linked to (e.g. the caller's own employee id).
    pub fn linked_resource(session: &SessionState) -> Result<i64> {
        Self::require_active(session)?;
        session
            .linked_resource_id()
            .ok_or_else(|| deny(session, DenialReason::NoLinkedResource))
    }

    fn require_active(session: &SessionState) -> Result<()> {
        if session.is_active() {
            Ok(())
        } else {
            Err(deny(session, DenialReason::SessionInactive))
        }
    }

    fn check_role(session: &SessionState, role: &str) -> Result<()> {
        if Role::new(role).is_err() {
            return Err(deny(session, DenialReason::InvalidInput));
        }
        if session.role().matches(role) {
            Ok(())
        } else {
            Err(deny(session, DenialReason::RoleMismatch))
        }
    }

    fn check_ownership(session: &SessionState, resource_id: i64) -> Result<()> {
        match session.linked_resource_id() {
            Some(linked) if linked == resource_id => Ok(()),
            Some(_) => Err(deny(session, DenialReason::OwnershipMismatch)),
            None => Err(deny(session, DenialReason::NoLinkedResource)),
        }
    }
}

fn deny(session: &SessionState, reason: DenialReason) -> Error {
    tracing::debug!(
        account_id = session.account_id(),
        session_id = %session.id(),
        reason = reason.label(),
        "Access denied"
    );
    Error::AccessDenied(reason)
}
