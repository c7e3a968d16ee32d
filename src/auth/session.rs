//! Per-login session state with inactivity timeout.
//!
//! States:
//! - **Active**: not invalidated and idle for at most `timeout`.
//! - **Expired**: derived on every read from `last_activity_at`; nothing sweeps it.
//! - **Invalidated**: terminal, set by `invalidate()`.
//!
//! Reads and writes of the mutable part go through one mutex, so a `touch()`
//! racing an `invalidate()` can never re-open a session after logout.

use super::role::Role;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ── Clock ───────────────────────────────────────────────────────────

/// Source of wall-clock time for session bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to simulate idle time.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward. Clamps to the latest representable time.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock();
        *now = now
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ── Client info ─────────────────────────────────────────────────────

/// Where a login came from; copied onto the session's audit events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub source_address: Option<String>,
    pub client_label: String,
}

impl ClientInfo {
    pub fn new(client_label: impl Into<String>) -> Self {
        Self {
            source_address: None,
            client_label: client_label.into(),
        }
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Derived lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Invalidated,
}

#[derive(Debug)]
struct Activity {
    last_activity_at: DateTime<Utc>,
    active: bool,
}

/// A logged-in principal: identity, role, optional linked resource, and
/// the inactivity window.
pub struct SessionState {
    session_id: Uuid,
    account_id: i64,
    role: Role,
    linked_resource_id: Option<i64>,
    client: ClientInfo,
    created_at: DateTime<Utc>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    activity: Mutex<Activity>,
}

impl SessionState {
    /// Start an Active session; `created_at == last_activity_at == now`.
    pub fn new(
        account_id: i64,
        role: Role,
        linked_resource_id: Option<i64>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            session_id: Uuid::new_v4(),
            account_id,
            role,
            linked_resource_id,
            client: ClientInfo::default(),
            created_at: now,
            timeout,
            clock,
            activity: Mutex::new(Activity {
                last_activity_at: now,
                active: true,
            }),
        }
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn linked_resource_id(&self) -> Option<i64> {
        self.linked_resource_id
    }

    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.activity.lock().last_activity_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current state, recomputed from timestamps.
    pub fn status(&self) -> SessionStatus {
        let activity = self.activity.lock();
        if !activity.active {
            SessionStatus::Invalidated
        } else if self.idle_exceeds_timeout(&activity) {
            SessionStatus::Expired
        } else {
            SessionStatus::Active
        }
    }

    /// Not invalidated and idle for no longer than the timeout.
    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    /// Idle for longer than the timeout (regardless of invalidation).
    pub fn is_expired(&self) -> bool {
        let activity = self.activity.lock();
        self.idle_exceeds_timeout(&activity)
    }

    pub fn is_invalidated(&self) -> bool {
        !self.activity.lock().active
    }

    /// Record activity, restarting the inactivity window.
    ///
    /// Only an Active session is extended; returns whether it was.
    pub fn touch(&self) -> bool {
        let mut activity = self.activity.lock();
        if !activity.active || self.idle_exceeds_timeout(&activity) {
            return false;
        }
        activity.last_activity_at = self.clock.now();
        true
    }

    /// End the session permanently. Returns `true` only for the call that
    /// performed the transition.
    pub fn invalidate(&self) -> bool {
        let mut activity = self.activity.lock();
        let was_active = activity.active;
        activity.active = false;
        was_active
    }

    /// Time left before expiry; zero once expired or invalidated.
    pub fn remaining_time(&self) -> Duration {
        let activity = self.activity.lock();
        if !activity.active {
            return Duration::ZERO;
        }
        self.timeout
            .saturating_sub(idle_since(self.clock.now(), activity.last_activity_at))
    }

    fn idle_exceeds_timeout(&self, activity: &Activity) -> bool {
        idle_since(self.clock.now(), activity.last_activity_at) > self.timeout
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("session_id", &self.session_id)
            .field("account_id", &self.account_id)
            .field("role", &self.role)
            .field("linked_resource_id", &self.linked_resource_id)
            .field("created_at", &self.created_at)
            .field("timeout", &self.timeout)
            .field("status", &self.status())
            .finish()
    }
}

/// Idle time; a clock that went backwards counts as zero.
fn idle_since(now: DateTime<Utc>, last: DateTime<Utc>) -> Duration {
    (now - last).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn session(timeout_minutes: u64) -> (Arc<ManualClock>, SessionState) {
        let clock = Arc::new(ManualClock::starting_now());
        let session = SessionState::new(
            1,
            Role::employee(),
            Some(7),
            MINUTE * timeout_minutes as u32,
            clock.clone(),
        );
        (clock, session)
    }

    #[test]
    fn new_session_is_active() {
        let (_clock, s) = session(30);
        assert!(s.is_active());
        assert!(!s.is_expired());
        assert_eq!(s.status(), SessionStatus::Active);
        assert_eq!(s.created_at(), s.last_activity_at());
        assert_eq!(s.remaining_time(), MINUTE * 30);
    }

    #[test]
    fn expires_after_timeout_of_inactivity() {
        let (clock, s) = session(30);
        clock.advance(MINUTE * 30);
        assert!(s.is_active(), "exactly at the timeout is still active");
        assert_eq!(s.remaining_time(), Duration::ZERO);

        clock.advance(Duration::from_secs(1));
        assert!(!s.is_active());
        assert!(s.is_expired());
        assert_eq!(s.status(), SessionStatus::Expired);
        assert_eq!(s.remaining_time(), Duration::ZERO);
    }

    #[test]
    fn touch_before_expiry_restarts_window() {
        let (clock, s) = session(30);
        clock.advance(MINUTE * 20);
        assert!(s.touch());
        clock.advance(MINUTE * 20);
        assert!(s.is_active());
        assert_eq!(s.remaining_time(), MINUTE * 10);
        clock.advance(MINUTE * 11);
        assert!(!s.is_active());
    }

    #[test]
    fn touch_does_not_revive_expired_session() {
        let (clock, s) = session(5);
        clock.advance(MINUTE * 6);
        assert!(!s.touch());
        assert!(!s.is_active());
    }

    #[test]
    fn invalidate_is_permanent() {
        let (_clock, s) = session(30);
        assert!(s.invalidate());
        assert!(!s.touch());
        assert!(!s.is_active());
        assert!(s.is_invalidated());
        assert_eq!(s.status(), SessionStatus::Invalidated);
        assert_eq!(s.remaining_time(), Duration::ZERO);
        assert!(!s.invalidate(), "second invalidate is a no-op");
    }

    #[test]
    fn clock_going_backwards_counts_as_no_idle_time() {
        let (clock, s) = session(30);
        clock.set(s.created_at() - TimeDelta::minutes(5));
        assert!(s.is_active());
        assert_eq!(s.remaining_time(), MINUTE * 30);
    }

    #[test]
    fn sessions_get_distinct_ids_and_carry_identity() {
        let (_c1, a) = session(30);
        let (_c2, b) = session(30);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.account_id(), 1);
        assert_eq!(a.linked_resource_id(), Some(7));
        assert!(a.role().matches("employee"));
    }

    #[test]
    fn client_info_is_attached() {
        let (_clock, s) = session(30);
        let s = s.with_client(ClientInfo::new("desktop").with_source_address("10.0.0.5"));
        assert_eq!(s.client().client_label, "desktop");
        assert_eq!(s.client().source_address.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn concurrent_touch_cannot_resurrect_after_invalidate() {
        let (_clock, s) = session(30);
        let s = Arc::new(s);

        let toucher = {
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    s.touch();
                }
            })
        };
        assert!(s.invalidate());
        toucher.join().unwrap();

        assert!(!s.is_active());
        assert!(!s.touch());
    }

    #[test]
    fn debug_output_shows_status() {
        let (_clock, s) = session(30);
        let rendered = format!("{s:?}");
        assert!(rendered.contains("Active"));
    }

    #[test]
    fn manual_clock_advance_clamps_at_the_end_of_time() {
        let near_end = DateTime::<Utc>::MAX_UTC - TimeDelta::seconds(10);
        let clock = ManualClock::new(near_end);
        clock.advance(MINUTE);
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
    }
}
