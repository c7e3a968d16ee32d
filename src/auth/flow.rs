//! Login, logout and password change.
//!
//! The flow owns no state besides configuration: accounts come from a
//! [`UserStore`], events go to an [`AuditSink`], and each successful login
//! hands the caller a fresh [`SessionState`].

use super::audit::{AuditSink, AuthEvent, AuthEventKind, LoginFailureReason};
use super::role::Role;
use super::session::{ClientInfo, Clock, SessionState, SystemClock};
use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::security::{Credential, CredentialHasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Passphrase hashed once at startup and verified against when a username
/// does not resolve, so unknown and known usernames cost the same.
const TIMING_DUMMY_PASSPHRASE: &str = "ems-timing-equalizer";

/// What the account store returns for one username.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub account_id: i64,
    pub username: String,
    pub credential: Credential,
    pub active: bool,
    /// `None` means the account has no role assigned; it logs in as `EMPLOYEE`.
    pub role: Option<Role>,
    /// Resource (employee record) owned by this account, if any.
    pub linked_resource_id: Option<i64>,
}

/// Account lookup and credential persistence.
pub trait UserStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> anyhow::Result<Option<AccountRecord>>;

    /// Replace an account's hash and salt. `Ok(false)` if no such account.
    fn update_credential(&self, account_id: i64, credential: &Credential) -> anyhow::Result<bool>;
}

/// Orchestrates authentication against a user store.
pub struct AuthenticationFlow {
    store: Arc<dyn UserStore>,
    audit: Arc<dyn AuditSink>,
    hasher: CredentialHasher,
    session_timeout: Duration,
    clock: Arc<dyn Clock>,
    client_label: String,
    timing_dummy: Credential,
    audit_failures: AtomicU64,
}

impl AuthenticationFlow {
    pub fn new(
        store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditSink>,
        hasher: CredentialHasher,
        session_timeout: Duration,
    ) -> Result<Self> {
        if session_timeout.is_zero() {
            return Err(Error::config("session timeout must be positive"));
        }
        let timing_dummy = hasher.hash(TIMING_DUMMY_PASSPHRASE)?;
        Ok(Self {
            store,
            audit,
            hasher,
            session_timeout,
            clock: Arc::new(SystemClock),
            client_label: crate::config::DEFAULT_CLIENT_LABEL.to_string(),
            timing_dummy,
            audit_failures: AtomicU64::new(0),
        })
    }

    /// Build from validated configuration.
    pub fn from_config(
        config: &SecurityConfig,
        store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let hasher = CredentialHasher::from_config(&config.password)?;
        let timeout = config.session.timeout()?;
        Ok(Self::new(store, audit, hasher, timeout)?
            .with_client_label(config.audit.client_label.clone()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default client label for logins that do not supply a [`ClientInfo`].
    pub fn with_client_label(mut self, label: impl Into<String>) -> Self {
        self.client_label = label.into();
        self
    }

    pub fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Number of audit events the sink failed to record.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    /// Authenticate with the flow's default client label.
    pub fn login(&self, username: &str, passphrase: &str) -> Result<SessionState> {
        self.login_from(username, passphrase, ClientInfo::new(self.client_label.clone()))
    }

    /// Authenticate a username + passphrase.
    ///
    /// Unknown username, inactive account and wrong passphrase all return
    /// [`Error::InvalidCredentials`]; the distinction only reaches the audit
    /// sink. An unreachable store denies with [`Error::Infrastructure`].
    pub fn login_from(
        &self,
        username: &str,
        passphrase: &str,
        client: ClientInfo,
    ) -> Result<SessionState> {
        let username = username.trim();

        let record = match self.store.find_by_username(username) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "User store lookup failed; denying login");
                self.record_failure(None, LoginFailureReason::StoreUnavailable, &client);
                return Err(Error::Infrastructure("user store unavailable".into()));
            }
        };

        let Some(record) = record else {
            let _ = self
                .hasher
                .verify_credential(passphrase, &self.timing_dummy);
            self.record_failure(None, LoginFailureReason::UnknownUsername, &client);
            return Err(Error::InvalidCredentials);
        };

        // Verify before looking at `active` so both branches cost one bcrypt.
        let verified = self.hasher.verify_credential(passphrase, &record.credential);
        let failure = if !record.active {
            Some(LoginFailureReason::InactiveAccount)
        } else if !verified {
            Some(LoginFailureReason::BadPassphrase)
        } else {
            None
        };
        if let Some(reason) = failure {
            self.record_failure(Some(record.account_id), reason, &client);
            return Err(Error::InvalidCredentials);
        }

        let role = record.role.unwrap_or_else(Role::employee);
        let session = SessionState::new(
            record.account_id,
            role,
            record.linked_resource_id,
            self.session_timeout,
            Arc::clone(&self.clock),
        )
        .with_client(client);

        self.record_event(AuthEvent {
            account_id: Some(record.account_id),
            kind: AuthEventKind::LoginSuccess,
            source_address: session.client().source_address.clone(),
            client_label: session.client().client_label.clone(),
            failure_reason: None,
            occurred_at: self.clock.now(),
        });
        tracing::info!(
            account_id = record.account_id,
            session_id = %session.id(),
            role = %session.role(),
            "Login succeeded"
        );
        Ok(session)
    }

    /// End a session. Repeated calls are no-ops and record nothing.
    ///
    /// Invalidates before recording LOGOUT: only the call that wins the
    /// transition records, so concurrent logouts yield one event.
    pub fn logout(&self, session: &SessionState) {
        if !session.invalidate() {
            tracing::debug!(session_id = %session.id(), "Session already logged out");
            return;
        }
        self.record_event(AuthEvent {
            account_id: Some(session.account_id()),
            kind: AuthEventKind::Logout,
            source_address: session.client().source_address.clone(),
            client_label: session.client().client_label.clone(),
            failure_reason: None,
            occurred_at: self.clock.now(),
        });
        tracing::info!(
            account_id = session.account_id(),
            session_id = %session.id(),
            "Logged out"
        );
    }

    /// Hash and store a new passphrase. Does not check the old one;
    /// callers authorize the change first.
    pub fn change_password(&self, account_id: i64, new_passphrase: &str) -> Result<()> {
        let credential = self.hasher.hash(new_passphrase)?;
        match self.store.update_credential(account_id, &credential) {
            Ok(true) => {
                tracing::info!(account_id, "Password changed");
                Ok(())
            }
            Ok(false) => Err(Error::validation(format!("no account with id {account_id}"))),
            Err(e) => {
                tracing::error!(account_id, error = %e, "Credential update failed");
                Err(Error::Infrastructure("user store unavailable".into()))
            }
        }
    }

    fn record_failure(
        &self,
        account_id: Option<i64>,
        reason: LoginFailureReason,
        client: &ClientInfo,
    ) {
        tracing::info!(account_id = ?account_id, reason = reason.as_str(), "Login failed");
        self.record_event(AuthEvent {
            account_id,
            kind: AuthEventKind::LoginFailure,
            source_address: client.source_address.clone(),
            client_label: client.client_label.clone(),
            failure_reason: Some(reason),
            occurred_at: self.clock.now(),
        });
    }

    fn record_event(&self, event: AuthEvent) {
        if let Err(e) = self.audit.record(&event) {
            self.audit_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                event = event.kind.as_str(),
                error = %e,
                "Audit sink failed; authentication outcome unchanged"
            );
        }
    }
}
