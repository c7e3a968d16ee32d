//! Authentication, sessions and authorization for the HR client.
//!
//! Provides:
//! - Login / logout / password change against a pluggable [`UserStore`]
//! - In-memory sessions with an inactivity timeout
//! - Role and ownership checks ([`AccessPolicy`])
//! - Audit events for every login attempt and logout
//! - A SQLite-backed reference store ([`SqliteUserStore`])
//!
//! ## Design Decisions
//! - Sessions live only in process memory; nothing about them is persisted.
//! - Every failure path is fail-closed. Callers see one generic error per
//!   category; the detailed reason goes to the audit sink or the debug log.
//! - Expiry is computed from timestamps on each query, so no background
//!   sweeper is needed.

pub mod audit;
pub mod flow;
pub mod policy;
pub mod role;
pub mod session;
pub mod store;

pub use audit::{
    AuditSink, AuthEvent, AuthEventKind, FanoutAuditSink, LoginFailureReason, TracingAuditSink,
};
pub use flow::{AccountRecord, AuthenticationFlow, UserStore};
pub use policy::{AccessPolicy, DenialReason};
pub use role::Role;
pub use session::{ClientInfo, Clock, ManualClock, SessionState, SessionStatus, SystemClock};
pub use store::SqliteUserStore;
