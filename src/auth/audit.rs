//! Authentication audit events and sinks.
//!
//! Auditing is best-effort: a sink error is reported to the caller of
//! `record`, and the authentication flow logs and counts it without
//! changing the authentication outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// tracing target used by [`TracingAuditSink`].
pub const AUDIT_TARGET: &str = "ems_security::audit";

/// Type of authentication event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    LoginSuccess,
    LoginFailure,
    Logout,
}

impl AuthEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::Logout => "LOGOUT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LOGIN_SUCCESS" => Some(Self::LoginSuccess),
            "LOGIN_FAILURE" => Some(Self::LoginFailure),
            "LOGOUT" => Some(Self::Logout),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal detail of a failed login. Recorded for audit only; the caller
/// always sees `invalid credentials`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFailureReason {
    UnknownUsername,
    InactiveAccount,
    BadPassphrase,
    StoreUnavailable,
}

impl LoginFailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownUsername => "unknown_username",
            Self::InactiveAccount => "inactive_account",
            Self::BadPassphrase => "bad_passphrase",
            Self::StoreUnavailable => "store_unavailable",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unknown_username" => Some(Self::UnknownUsername),
            "inactive_account" => Some(Self::InactiveAccount),
            "bad_passphrase" => Some(Self::BadPassphrase),
            "store_unavailable" => Some(Self::StoreUnavailable),
            _ => None,
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    /// Account involved; `None` when the username did not resolve.
    pub account_id: Option<i64>,
    pub kind: AuthEventKind,
    pub source_address: Option<String>,
    pub client_label: String,
    /// Set only for `LoginFailure`.
    pub failure_reason: Option<LoginFailureReason>,
    pub occurred_at: DateTime<Utc>,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuthEvent) -> anyhow::Result<()>;
}

/// Emits audit events as `tracing` records on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuthEvent) -> anyhow::Result<()> {
        tracing::info!(
            target: AUDIT_TARGET,
            event = event.kind.as_str(),
            account_id = ?event.account_id,
            source_address = ?event.source_address,
            client = %event.client_label,
            reason = event.failure_reason.map(LoginFailureReason::as_str),
            "Authentication event"
        );
        Ok(())
    }
}

/// Forwards each event to every inner sink, even after one fails.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuthEvent) -> anyhow::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
