//! Open, case-insensitive role names.
//!
//! Roles live in the account store and can be added without code changes,
//! so a role is a validated string rather than an enum. Comparison ignores
//! ASCII case: `HR_ADMIN` and `hr_admin` are the same role.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Maximum role name length.
const MAX_ROLE_LEN: usize = 64;

/// Human-resources administrator.
pub const HR_ADMIN: &str = "HR_ADMIN";

/// Regular employee; given to accounts that carry no role.
pub const EMPLOYEE: &str = "EMPLOYEE";

/// A validated role name.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

impl Role {
    /// Validate and wrap a role name (surrounding whitespace is trimmed).
    pub fn new(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::validation("role name cannot be empty"));
        }
        if trimmed.len() > MAX_ROLE_LEN {
            return Err(Error::validation(format!(
                "role name too long (max {MAX_ROLE_LEN} characters)"
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::validation(
                "role name may only contain ASCII letters, digits, '_' and '-'",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn hr_admin() -> Self {
        Self(HR_ADMIN.to_string())
    }

    pub fn employee() -> Self {
        Self(EMPLOYEE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive match against a role name. Blank names never match.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        !name.is_empty() && self.0.eq_ignore_ascii_case(name)
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl std::hash::Hash for Role {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_uppercase());
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
