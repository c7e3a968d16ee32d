//! Security core for the EMS desktop client.
//!
//! - [`security`]: bcrypt credential hashing and AES field protection
//! - [`auth`]: login flow, sessions, access policy, audit
//! - [`config`]: TOML configuration loaded once at startup

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod security;

pub use auth::{AccessPolicy, AuthenticationFlow, Role, SessionState};
pub use config::SecurityConfig;
pub use error::{Error, Result};
pub use security::{CredentialHasher, SensitiveFieldProtector};
