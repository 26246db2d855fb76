//! Failure & Lockout Tracker

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use gate_core::config::LockoutConfig;
use gate_core::types::AuthMethod;
use gate_core::GateResult;
use gate_models::{LockoutOutcome, User, UserStore};
use gate_notifications::{notify_quietly, Notifier, SecurityEvent, SecurityNotification};

pub struct LockoutTracker {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    config: LockoutConfig,
}

impl LockoutTracker {
    pub fn new(users: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>, config: LockoutConfig) -> Self {
        Self {
            users,
            notifier,
            config,
        }
    }

    pub fn maximum_attempts(&self) -> i32 {
        self.config.maximum_attempts
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::minutes(self.config.unlock_in_minutes)
    }

    /// Count one failure. Returns whether the account is now locked.
    ///
    /// Notifications are handed off without waiting; their failure is logged
    /// and otherwise ignored.
    pub async fn record_failure(
        &self,
        user: &User,
        method: AuthMethod,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) -> GateResult<bool> {
        let outcome: LockoutOutcome = self
            .users
            .record_failed_attempt(user.id, now, self.config.maximum_attempts, self.lock_duration())
            .await?;

        if method == AuthMethod::Otp {
            self.notify_otp_failure(user, now, ip);
        }

        if outcome.newly_locked {
            tracing::warn!(
                user_id = user.id,
                method = method.as_str(),
                failed_attempts = outcome.failed_attempts,
                "Account locked after repeated failures"
            );
            notify_quietly(
                self.notifier.as_ref(),
                SecurityNotification::new(
                    SecurityEvent::AccountLocked,
                    user.id,
                    &user.login,
                    &user.mail,
                    now,
                )
                .method(method)
                .ip_address(ip.map(str::to_string))
                .locked_until(outcome.locked_until),
            );
        }

        Ok(outcome.is_locked(now))
    }

    /// Tell the user someone got their password right but not the code
    pub fn notify_otp_failure(&self, user: &User, now: DateTime<Utc>, ip: Option<&str>) {
        notify_quietly(
            self.notifier.as_ref(),
            SecurityNotification::new(
                SecurityEvent::TwoFactorOtpAttemptFailed,
                user.id,
                &user.login,
                &user.mail,
                now,
            )
            .method(AuthMethod::Otp)
            .ip_address(ip.map(str::to_string)),
        );
    }

    /// A validly signed assertion whose counter went backwards
    pub fn record_counter_regression(
        &self,
        user: &User,
        stored: u32,
        presented: u32,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) {
        tracing::warn!(
            user_id = user.id,
            stored,
            presented,
            "WebAuthn counter did not advance, credential may be cloned"
        );
        notify_quietly(
            self.notifier.as_ref(),
            SecurityNotification::new(
                SecurityEvent::PossibleClonedCredential,
                user.id,
                &user.login,
                &user.mail,
                now,
            )
            .method(AuthMethod::WebAuthn)
            .ip_address(ip.map(str::to_string)),
        );
    }

    pub async fn record_success(&self, user: &User, now: DateTime<Utc>) -> GateResult<()> {
        self.users.record_success(user.id, now).await
    }

    pub fn is_locked(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.is_access_locked(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_models::MemoryUserStore;
    use gate_notifications::{NotifyError, RecordingNotifier};
    use mockall::mock;

    mock! {
        pub Sink {}
        impl Notifier for Sink {
            fn notify(&self, notification: SecurityNotification) -> Result<(), NotifyError>;
        }
    }

    fn user() -> User {
        User::new(1, "alice", "alice@example.com", "hash")
    }

    fn tracker(notifier: Arc<dyn Notifier>) -> (Arc<MemoryUserStore>, LockoutTracker) {
        let users = Arc::new(MemoryUserStore::with_users([user()]));
        let tracker = LockoutTracker::new(
            users.clone(),
            notifier,
            LockoutConfig {
                maximum_attempts: 3,
                unlock_in_minutes: 10,
            },
        );
        (users, tracker)
    }

    #[tokio::test]
    async fn test_locks_on_threshold_and_notifies() {
        let notifier = RecordingNotifier::new();
        let (users, tracker) = tracker(Arc::new(notifier.clone()));
        let now = Utc::now();

        assert!(!tracker.record_failure(&user(), AuthMethod::Otp, now, None).await.unwrap());
        assert!(!tracker.record_failure(&user(), AuthMethod::Otp, now, None).await.unwrap());
        assert!(tracker
            .record_failure(&user(), AuthMethod::Otp, now, Some("10.0.0.1"))
            .await
            .unwrap());

        let locked = users.get(1).unwrap();
        assert!(tracker.is_locked(&locked, now));
        assert_eq!(locked.locked_until, Some(now + Duration::minutes(10)));

        let events: Vec<_> = notifier.sent().iter().map(|n| n.event).collect();
        assert_eq!(
            events,
            vec![
                SecurityEvent::TwoFactorOtpAttemptFailed,
                SecurityEvent::TwoFactorOtpAttemptFailed,
                SecurityEvent::TwoFactorOtpAttemptFailed,
                SecurityEvent::AccountLocked,
            ]
        );
    }

    #[tokio::test]
    async fn test_webauthn_failures_do_not_send_otp_notice() {
        let notifier = RecordingNotifier::new();
        let (_, tracker) = tracker(Arc::new(notifier.clone()));
        tracker
            .record_failure(&user(), AuthMethod::WebAuthn, Utc::now(), None)
            .await
            .unwrap();
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_change_decision() {
        let mut sink = MockSink::new();
        sink.expect_notify()
            .returning(|_| Err(NotifyError::Delivery("smtp down".to_string())));
        let (users, tracker) = tracker(Arc::new(sink));
        let now = Utc::now();

        for _ in 0..3 {
            tracker.record_failure(&user(), AuthMethod::Otp, now, None).await.unwrap();
        }
        assert!(users.get(1).unwrap().is_access_locked(now));
    }

    #[test]
    fn test_counter_regression_notifies_without_counting() {
        let notifier = RecordingNotifier::new();
        let (users, tracker) = tracker(Arc::new(notifier.clone()));
        tracker.record_counter_regression(&user(), 9, 4, Utc::now(), Some("10.0.0.1"));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, SecurityEvent::PossibleClonedCredential);
        assert_eq!(users.get(1).unwrap().failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_success_resets() {
        let (users, tracker) = tracker(Arc::new(RecordingNotifier::new()));
        let now = Utc::now();
        tracker.record_failure(&user(), AuthMethod::Password, now, None).await.unwrap();
        tracker.record_success(&user(), now).await.unwrap();
        assert_eq!(users.get(1).unwrap().failed_attempts, 0);
    }
}
