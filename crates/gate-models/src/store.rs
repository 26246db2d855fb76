//! User storage boundary
//!
//! The authenticators never write a whole `User` back. The two pieces of
//! shared mutable state, the lockout counter and the WebAuthn signature
//! counter, are changed through single atomic operations so that racing
//! requests for the same user cannot lose an update.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gate_core::traits::Id;
use gate_core::{GateError, GateResult};
use parking_lot::RwLock;

use crate::user::model::User;

/// Result of recording one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutOutcome {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    /// This attempt is the one that crossed the threshold
    pub newly_locked: bool,
}

impl LockoutOutcome {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| now < until)
    }

    /// Apply one failure to the current counter values.
    ///
    /// A lock whose window has lapsed counts as unlocked, so the counter
    /// restarts from zero. A still-open lock is left unchanged.
    pub fn apply(
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        maximum_attempts: i32,
        lock_duration: Duration,
    ) -> Self {
        let (previous, locked_until) = match locked_until {
            Some(until) if until <= now => (0, None),
            other => (failed_attempts, other),
        };

        let failed_attempts = previous.saturating_add(1);
        if locked_until.is_none() && failed_attempts >= maximum_attempts {
            return Self {
                failed_attempts,
                locked_until: Some(now + lock_duration),
                newly_locked: true,
            };
        }

        Self {
            failed_attempts,
            locked_until,
            newly_locked: false,
        }
    }
}

/// Storage capability consumed by the authenticators
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, id: Id) -> GateResult<Option<User>>;

    async fn find_by_login(&self, login: &str) -> GateResult<Option<User>>;

    /// Atomically increment the failure counter, locking the account on the
    /// attempt that reaches `maximum_attempts`
    async fn record_failed_attempt(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
        maximum_attempts: i32,
        lock_duration: Duration,
    ) -> GateResult<LockoutOutcome>;

    /// Reset the failure counter and clear any lock
    async fn record_success(&self, user_id: Id, now: DateTime<Utc>) -> GateResult<()>;

    /// Compare-and-set the signature counter of a registration. Returns
    /// `false` when the stored counter no longer equals `expected_previous`.
    async fn advance_webauthn_counter(
        &self,
        registration_id: Id,
        expected_previous: u32,
        new_counter: u32,
    ) -> GateResult<bool>;

    /// Stamp the start of the enrollment grace period if not stamped yet.
    /// Returns the effective start.
    async fn begin_otp_grace_period(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
    ) -> GateResult<DateTime<Utc>>;
}

fn user_not_found(id: Id) -> GateError {
    GateError::NotFound {
        entity: "User",
        field: "id",
        value: id.to_string(),
    }
}

/// In-memory user store for development/testing
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Id, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        for user in users {
            store.insert(user);
        }
        store
    }

    pub fn insert(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    /// Apply an out-of-band change, e.g. a password change in another tab
    pub fn update<F>(&self, id: Id, f: F) -> bool
    where
        F: FnOnce(&mut User),
    {
        match self.users.write().get_mut(&id) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Id) -> Option<User> {
        self.users.read().get(&id).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find(&self, id: Id) -> GateResult<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_login(&self, login: &str) -> GateResult<Option<User>> {
        let users = self.users.read();
        Ok(users
            .values()
            .find(|u| u.login.eq_ignore_ascii_case(login))
            .cloned())
    }

    async fn record_failed_attempt(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
        maximum_attempts: i32,
        lock_duration: Duration,
    ) -> GateResult<LockoutOutcome> {
        let mut users = self.users.write();
        let user = users.get_mut(&user_id).ok_or_else(|| user_not_found(user_id))?;

        let outcome = LockoutOutcome::apply(
            user.failed_attempts,
            user.locked_until,
            now,
            maximum_attempts,
            lock_duration,
        );
        user.failed_attempts = outcome.failed_attempts;
        user.locked_until = outcome.locked_until;
        user.updated_at = Some(now);
        Ok(outcome)
    }

    async fn record_success(&self, user_id: Id, now: DateTime<Utc>) -> GateResult<()> {
        let mut users = self.users.write();
        let user = users.get_mut(&user_id).ok_or_else(|| user_not_found(user_id))?;
        user.failed_attempts = 0;
        user.locked_until = None;
        user.last_sign_in_at = Some(now);
        user.updated_at = Some(now);
        Ok(())
    }

    async fn advance_webauthn_counter(
        &self,
        registration_id: Id,
        expected_previous: u32,
        new_counter: u32,
    ) -> GateResult<bool> {
        let mut users = self.users.write();
        let registration = users
            .values_mut()
            .flat_map(|u| u.webauthn_registrations.iter_mut())
            .find(|r| r.id == registration_id);

        match registration {
            Some(r) if r.counter == expected_previous => {
                r.counter = new_counter;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(GateError::NotFound {
                entity: "WebAuthnRegistration",
                field: "id",
                value: registration_id.to_string(),
            }),
        }
    }

    async fn begin_otp_grace_period(
        &self,
        user_id: Id,
        now: DateTime<Utc>,
    ) -> GateResult<DateTime<Utc>> {
        let mut users = self.users.write();
        let user = users.get_mut(&user_id).ok_or_else(|| user_not_found(user_id))?;
        Ok(*user.otp_grace_period_started_at.get_or_insert(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::webauthn::WebAuthnRegistration;

    fn store() -> MemoryUserStore {
        let mut alice = User::new(1, "alice", "alice@example.com", "hash");
        alice
            .webauthn_registrations
            .push(WebAuthnRegistration::new(7, 1, "cred", "key"));
        MemoryUserStore::with_users([alice])
    }

    #[test]
    fn test_apply_locks_on_threshold() {
        let now = Utc::now();
        let dur = Duration::minutes(10);

        let outcome = LockoutOutcome::apply(3, None, now, 5, dur);
        assert_eq!(outcome.failed_attempts, 4);
        assert!(!outcome.newly_locked);

        let outcome = LockoutOutcome::apply(4, None, now, 5, dur);
        assert_eq!(outcome.failed_attempts, 5);
        assert!(outcome.newly_locked);
        assert_eq!(outcome.locked_until, Some(now + dur));
        assert!(outcome.is_locked(now));
    }

    #[test]
    fn test_apply_restarts_after_lapsed_lock() {
        let now = Utc::now();
        let outcome =
            LockoutOutcome::apply(5, Some(now - Duration::seconds(1)), now, 5, Duration::minutes(10));
        assert_eq!(outcome.failed_attempts, 1);
        assert_eq!(outcome.locked_until, None);
    }

    #[test]
    fn test_apply_keeps_open_lock() {
        let now = Utc::now();
        let until = now + Duration::minutes(3);
        let outcome = LockoutOutcome::apply(5, Some(until), now, 5, Duration::minutes(10));
        assert_eq!(outcome.locked_until, Some(until));
        assert!(!outcome.newly_locked);
    }

    #[tokio::test]
    async fn test_failed_attempts_and_success() {
        let store = store();
        let now = Utc::now();

        for _ in 0..2 {
            store
                .record_failed_attempt(1, now, 3, Duration::minutes(10))
                .await
                .unwrap();
        }
        let outcome = store
            .record_failed_attempt(1, now, 3, Duration::minutes(10))
            .await
            .unwrap();
        assert!(outcome.newly_locked);
        assert!(store.get(1).unwrap().is_access_locked(now));

        store.record_success(1, now).await.unwrap();
        let user = store.get(1).unwrap();
        assert_eq!(user.failed_attempts, 0);
        assert_eq!(user.locked_until, None);
        assert_eq!(user.last_sign_in_at, Some(now));
    }

    #[tokio::test]
    async fn test_counter_compare_and_set() {
        let store = store();
        assert!(store.advance_webauthn_counter(7, 0, 5).await.unwrap());
        // Second writer with the same expectation loses
        assert!(!store.advance_webauthn_counter(7, 0, 6).await.unwrap());
        assert_eq!(store.get(1).unwrap().webauthn_registrations[0].counter, 5);
    }

    #[tokio::test]
    async fn test_grace_period_stamped_once() {
        let store = store();
        let first = Utc::now();
        let later = first + Duration::hours(1);
        assert_eq!(store.begin_otp_grace_period(1, first).await.unwrap(), first);
        assert_eq!(store.begin_otp_grace_period(1, later).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_find_by_login_is_case_insensitive() {
        let store = store();
        assert!(store.find_by_login("ALICE").await.unwrap().is_some());
        assert!(store.find_by_login("bob").await.unwrap().is_none());
        assert!(matches!(
            store.record_success(99, Utc::now()).await,
            Err(GateError::NotFound { .. })
        ));
    }
}
