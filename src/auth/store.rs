//! SQLite-backed account store and audit log.
//!
//! Tables:
//! - `accounts`: username, password_hash, password_salt, active, role, linked_resource_id
//! - `auth_events`: account_id, event_type, event_time, source_address, client_label, detail
//!
//! One store owns one connection; pass it (usually as an `Arc`) to whoever
//! needs it instead of reaching for a global.

use super::audit::{AuditSink, AuthEvent, AuthEventKind, LoginFailureReason};
use super::flow::{AccountRecord, UserStore};
use super::role::Role;
use crate::security::Credential;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;

/// Maximum username length.
const MAX_USERNAME_LEN: usize = 64;

const ACCOUNT_COLUMNS: &str =
    "id, username, password_hash, password_salt, active, role, linked_resource_id";

/// Account row before the role string is validated.
struct AccountRow {
    id: i64,
    username: String,
    password_hash: Vec<u8>,
    password_salt: Vec<u8>,
    active: bool,
    role: Option<String>,
    linked_resource_id: Option<i64>,
}

impl AccountRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            password_salt: row.get(3)?,
            active: row.get(4)?,
            role: row.get(5)?,
            linked_resource_id: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<AccountRecord> {
        let role = match self.role.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                Role::new(raw)
                    .map_err(|e| anyhow!("account {} has an invalid role: {e}", self.id))?,
            ),
        };
        Ok(AccountRecord {
            account_id: self.id,
            username: self.username,
            credential: Credential::from_parts(self.password_hash, self.password_salt),
            active: self.active,
            role,
            linked_resource_id: self.linked_resource_id,
        })
    }
}

/// SQLite-backed account store.
pub struct SqliteUserStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteUserStore {
    /// Open (or create) the account database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash BLOB NOT NULL,
                password_salt BLOB NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                role TEXT,
                linked_resource_id INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auth_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER,
                event_type TEXT NOT NULL,
                event_time INTEGER NOT NULL,
                source_address TEXT,
                client_label TEXT NOT NULL,
                detail TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_auth_events_account ON auth_events(account_id);
            CREATE INDEX IF NOT EXISTS idx_auth_events_type ON auth_events(event_type);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Account Management ──────────────────────────────────────────

    /// Create an account. Returns the new account ID.
    pub fn create_account(
        &self,
        username: &str,
        credential: &Credential,
        role: Option<&Role>,
        linked_resource_id: Option<i64>,
    ) -> Result<i64> {
        let trimmed = username.trim();
        if trimmed.is_empty() {
            bail!("Username cannot be empty");
        }
        if trimmed.len() > MAX_USERNAME_LEN {
            bail!("Username too long (max {MAX_USERNAME_LEN} characters)");
        }

        let now = epoch_secs();
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO accounts
                (username, password_hash, password_salt, active, role, linked_resource_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                trimmed,
                credential.hash(),
                credential.salt(),
                role.map(Role::as_str),
                linked_resource_id,
                now,
            ],
        );

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::info!(account_id = id, "Account created");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Username '{}' is already taken", trimmed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an account by ID.
    pub fn find_by_id(&self, account_id: i64) -> Result<Option<AccountRecord>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            rusqlite::params![account_id],
            AccountRow::from_row,
        );

        match row {
            Ok(row) => row.into_record().map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Enable or disable an account. Returns `false` if it does not exist.
    pub fn set_active(&self, account_id: i64, active: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE accounts SET active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![active, epoch_secs(), account_id],
        )?;
        if updated > 0 {
            tracing::info!(account_id, active, "Account status changed");
        }
        Ok(updated > 0)
    }

    /// Count accounts.
    pub fn account_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ── Audit Log ───────────────────────────────────────────────────

    /// Most recent audit events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<AuthEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT account_id, event_type, event_time, source_address, client_label, detail
             FROM auth_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(account_id, kind, time, source_address, client_label, detail)| {
                let kind = AuthEventKind::parse(&kind)
                    .ok_or_else(|| anyhow!("unknown audit event type '{kind}'"))?;
                let occurred_at = DateTime::<Utc>::from_timestamp(time, 0)
                    .ok_or_else(|| anyhow!("audit event time {time} out of range"))?;
                Ok(AuthEvent {
                    account_id,
                    kind,
                    source_address,
                    client_label,
                    failure_reason: detail.as_deref().and_then(LoginFailureReason::parse),
                    occurred_at,
                })
            })
            .collect()
    }

    /// Count audit events of one kind.
    pub fn count_events(&self, kind: AuthEventKind) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM auth_events WHERE event_type = ?1",
            rusqlite::params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl UserStore for SqliteUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<AccountRecord>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?1 COLLATE NOCASE"),
            rusqlite::params![username.trim()],
            AccountRow::from_row,
        );

        match row {
            Ok(row) => row.into_record().map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_credential(&self, account_id: i64, credential: &Credential) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE accounts SET password_hash = ?1, password_salt = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![credential.hash(), credential.salt(), epoch_secs(), account_id],
        )?;
        Ok(updated > 0)
    }
}

impl AuditSink for SqliteUserStore {
    fn record(&self, event: &AuthEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO auth_events
                (account_id, event_type, event_time, source_address, client_label, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                event.account_id,
                event.kind.as_str(),
                event.occurred_at.timestamp(),
                event.source_address,
                event.client_label,
                event.failure_reason.map(LoginFailureReason::as_str),
            ],
        )?;
        Ok(())
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> i64 {
    Utc::now().timestamp()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::flow::AuthenticationFlow;
    use crate::auth::policy::AccessPolicy;
    use crate::security::CredentialHasher;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteUserStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("accounts.db");
        let store = SqliteUserStore::open(&db_path).unwrap();
        (tmp, store)
    }

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(4).unwrap()
    }

    #[test]
    fn create_and_find_account() {
        let (_tmp, store) = test_store();
        let cred = hasher().hash("securepassword123").unwrap();
        let id = store
            .create_account("alice", &cred, Some(&Role::employee()), Some(7))
            .unwrap();

        let record = store.find_by_username("alice").unwrap().unwrap();
        assert_eq!(record.account_id, id);
        assert_eq!(record.username, "alice");
        assert_eq!(record.credential, cred);
        assert!(record.active);
        assert_eq!(record.role, Some(Role::employee()));
        assert_eq!(record.linked_resource_id, Some(7));

        let by_id = store.find_by_id(id).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let (_tmp, store) = test_store();
        let cred = hasher().hash("pw").unwrap();
        store.create_account("Alice", &cred, None, None).unwrap();
        assert!(store.find_by_username("ALICE").unwrap().is_some());
        assert!(store.find_by_username(" alice ").unwrap().is_some());
    }

    #[test]
    fn unknown_account_is_none() {
        let (_tmp, store) = test_store();
        assert!(store.find_by_username("ghost").unwrap().is_none());
        assert!(store.find_by_id(99).unwrap().is_none());
    }

    #[test]
    fn duplicate_username_fails() {
        let (_tmp, store) = test_store();
        let cred = hasher().hash("pw").unwrap();
        store.create_account("bob", &cred, None, None).unwrap();
        let result = store.create_account("BOB", &cred, None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already taken"));
    }

    #[test]
    fn empty_username_fails() {
        let (_tmp, store) = test_store();
        let cred = hasher().hash("pw").unwrap();
        let result = store.create_account("  ", &cred, None, None);
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn update_credential_replaces_blobs() {
        let (_tmp, store) = test_store();
        let h = hasher();
        let id = store
            .create_account("carol", &h.hash("old").unwrap(), None, None)
            .unwrap();

        let fresh = h.hash("new").unwrap();
        assert!(store.update_credential(id, &fresh).unwrap());
        assert!(!store.update_credential(id + 100, &fresh).unwrap());

        let record = store.find_by_id(id).unwrap().unwrap();
        assert!(h.verify_credential("new", &record.credential));
        assert!(!h.verify_credential("old", &record.credential));
    }

    #[test]
    fn set_active_toggles_account() {
        let (_tmp, store) = test_store();
        let id = store
            .create_account("dave", &hasher().hash("pw").unwrap(), None, None)
            .unwrap();
        assert!(store.set_active(id, false).unwrap());
        assert!(!store.find_by_id(id).unwrap().unwrap().active);
        assert!(!store.set_active(999, false).unwrap());
    }

    #[test]
    fn account_count_tracks_creation() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        assert_eq!(store.account_count().unwrap(), 0);
        let cred = hasher().hash("pw").unwrap();
        store.create_account("a", &cred, None, None).unwrap();
        store.create_account("b", &cred, None, None).unwrap();
        assert_eq!(store.account_count().unwrap(), 2);
    }

    #[test]
    fn invalid_stored_role_is_an_error() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        let id = store
            .create_account("erin", &hasher().hash("pw").unwrap(), None, None)
            .unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE accounts SET role = 'bad role!' WHERE id = ?1",
                rusqlite::params![id],
            )
            .unwrap();
        assert!(store.find_by_username("erin").is_err());
    }

    #[test]
    fn audit_events_round_trip() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        let now = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap();
        let failure = AuthEvent {
            account_id: None,
            kind: AuthEventKind::LoginFailure,
            source_address: Some("10.1.2.3".into()),
            client_label: "desktop".into(),
            failure_reason: Some(LoginFailureReason::UnknownUsername),
            occurred_at: now,
        };
        store.record(&failure).unwrap();
        store
            .record(&AuthEvent {
                account_id: Some(1),
                kind: AuthEventKind::Logout,
                source_address: None,
                client_label: "desktop".into(),
                failure_reason: None,
                occurred_at: now,
            })
            .unwrap();

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuthEventKind::Logout);
        assert_eq!(events[1], failure);
        assert_eq!(store.count_events(AuthEventKind::LoginFailure).unwrap(), 1);
        assert_eq!(store.count_events(AuthEventKind::LoginSuccess).unwrap(), 0);
    }

    #[test]
    fn flow_over_sqlite_store() {
        let store = Arc::new(SqliteUserStore::open_in_memory().unwrap());
        let h = hasher();
        store
            .create_account(
                "alice",
                &h.hash("correct-pw").unwrap(),
                Some(&Role::employee()),
                Some(7),
            )
            .unwrap();

        let flow = AuthenticationFlow::new(
            store.clone(),
            store.clone(),
            h,
            Duration::from_secs(15 * 60),
        )
        .unwrap();

        let session = flow.login("alice", "correct-pw").unwrap();
        AccessPolicy::require_ownership(&session, 7).unwrap();
        assert!(AccessPolicy::require_ownership(&session, 8).is_err());

        assert!(flow.login("alice", "wrong-pw").is_err());
        flow.logout(&session);
        flow.logout(&session);

        assert_eq!(store.count_events(AuthEventKind::LoginSuccess).unwrap(), 1);
        assert_eq!(store.count_events(AuthEventKind::LoginFailure).unwrap(), 1);
        assert_eq!(store.count_events(AuthEventKind::Logout).unwrap(), 1);
    }

    #[test]
    fn deactivated_account_cannot_log_in() {
        let store = Arc::new(SqliteUserStore::open_in_memory().unwrap());
        let h = hasher();
        let id = store
            .create_account("frank", &h.hash("pw").unwrap(), None, None)
            .unwrap();
        store.set_active(id, false).unwrap();

        let flow =
            AuthenticationFlow::new(store.clone(), store.clone(), h, Duration::from_secs(60))
                .unwrap();
        assert!(flow.login("frank", "pw").is_err());

        let events = store.recent_events(1).unwrap();
        assert_eq!(
            events[0].failure_reason,
            Some(LoginFailureReason::InactiveAccount)
        );
    }
}
