//! Two-Factor Requirement Policy
//!
//! Decides whether a user must have a second factor and how long they may
//! keep postponing enrollment.

use chrono::{DateTime, Duration, Utc};
use gate_core::config::TwoFactorConfig;
use gate_models::User;
use serde::Serialize;

use crate::session::Session;

/// Where the requirement comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorReason {
    Global,
    Group,
}

#[derive(Debug, Clone)]
pub struct TwoFactorPolicy {
    config: TwoFactorConfig,
    webauthn_available: bool,
}

impl TwoFactorPolicy {
    pub fn new(config: TwoFactorConfig) -> Self {
        Self {
            config,
            webauthn_available: true,
        }
    }

    /// Registrations only count as a factor while WebAuthn is turned on
    pub fn with_webauthn(mut self, available: bool) -> Self {
        self.webauthn_available = available;
        self
    }

    /// An enrolled factor that can actually be challenged right now
    pub fn has_usable_factor(&self, user: &User) -> bool {
        user.otp_active() || (self.webauthn_available && user.webauthn_enabled())
    }

    pub fn is_globally_required(&self) -> bool {
        self.config.required_globally
    }

    /// Global wins when both apply
    pub fn requirement_reason(&self, user: &User) -> Option<TwoFactorReason> {
        if self.is_globally_required() {
            Some(TwoFactorReason::Global)
        } else if user.require_two_factor_from_group {
            Some(TwoFactorReason::Group)
        } else {
            None
        }
    }

    pub fn is_required(&self, user: &User) -> bool {
        self.requirement_reason(user).is_some()
    }

    /// Required but not enrolled
    pub fn user_requires_setup(&self, user: &User) -> bool {
        self.is_required(user) && !self.has_usable_factor(user)
    }

    /// Configured grace period. When global and group enforcement both
    /// apply, the shorter one wins.
    pub fn grace_period(&self, user: &User) -> Duration {
        let global = self
            .is_globally_required()
            .then_some(self.config.grace_period_hours);
        let group = if user.require_two_factor_from_group {
            Some(
                user.group_grace_period_hours
                    .unwrap_or(self.config.grace_period_hours),
            )
        } else {
            None
        };

        let hours = match (global, group) {
            (Some(a), Some(b)) => a.min(b),
            (Some(h), None) | (None, Some(h)) => h,
            (None, None) => 0,
        };
        Duration::hours(hours.max(0))
    }

    /// Grace period minus time elapsed since the requirement began. An
    /// unstamped start counts as "starting now".
    pub fn grace_period_remaining(&self, user: &User, now: DateTime<Utc>) -> Duration {
        if !self.is_required(user) {
            return Duration::zero();
        }
        let started = user.otp_grace_period_started_at.unwrap_or(now);
        self.grace_period(user) - (now - started)
    }

    pub fn is_skippable(&self, user: &User, now: DateTime<Utc>) -> bool {
        self.is_required(user)
            && !self.has_usable_factor(user)
            && self.grace_period_remaining(user, now) > Duration::zero()
    }

    /// Setup demand for a signed-in user, honouring a skip the session
    /// recorded earlier
    pub fn current_user_requires_setup(&self, user: &User, session: &Session, now: DateTime<Utc>) -> bool {
        if !self.user_requires_setup(user) {
            return false;
        }
        let deferred = session
            .skip_two_factor_until
            .map_or(false, |until| now < until);
        !(deferred && self.is_skippable(user, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(required: bool) -> TwoFactorPolicy {
        TwoFactorPolicy::new(TwoFactorConfig {
            required_globally: required,
            grace_period_hours: 48,
            ..Default::default()
        })
    }

    fn user() -> User {
        User::new(1, "alice", "alice@example.com", "hash")
    }

    #[test]
    fn test_not_required() {
        let p = policy(false);
        let now = Utc::now();
        assert!(!p.user_requires_setup(&user()));
        assert!(!p.is_skippable(&user(), now));
        assert_eq!(p.requirement_reason(&user()), None);
    }

    #[test]
    fn test_global_requirement_with_grace() {
        let p = policy(true);
        let now = Utc::now();
        let mut user = user();
        assert!(p.user_requires_setup(&user));
        assert_eq!(p.grace_period_remaining(&user, now), Duration::hours(48));
        assert!(p.is_skippable(&user, now));

        user.otp_grace_period_started_at = Some(now - Duration::hours(47));
        assert_eq!(p.grace_period_remaining(&user, now), Duration::hours(1));

        user.otp_grace_period_started_at = Some(now - Duration::hours(48));
        assert!(!p.is_skippable(&user, now));
    }

    #[test]
    fn test_enrolled_user_is_never_skippable() {
        let p = policy(true);
        let mut user = user();
        user.otp_enabled = true;
        user.otp_secret = Some("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string());
        assert!(!p.user_requires_setup(&user));
        assert!(!p.is_skippable(&user, Utc::now()));
    }

    #[test]
    fn test_registration_without_webauthn_needs_setup() {
        let mut user = user();
        user.webauthn_registrations
            .push(gate_models::WebAuthnRegistration::new(1, 1, "cred", "key"));

        let p = policy(true);
        assert!(p.has_usable_factor(&user));
        assert!(!p.user_requires_setup(&user));

        let p = policy(true).with_webauthn(false);
        assert!(!p.has_usable_factor(&user));
        assert!(p.user_requires_setup(&user));
        assert!(p.is_skippable(&user, Utc::now()));
    }

    #[test]
    fn test_group_requirement_shorter_grace_wins() {
        let mut user = user();
        user.require_two_factor_from_group = true;
        user.group_grace_period_hours = Some(2);

        let p = policy(false);
        assert_eq!(p.requirement_reason(&user), Some(TwoFactorReason::Group));
        assert_eq!(p.grace_period(&user), Duration::hours(2));

        let p = policy(true);
        assert_eq!(p.requirement_reason(&user), Some(TwoFactorReason::Global));
        assert_eq!(p.grace_period(&user), Duration::hours(2));
    }

    #[test]
    fn test_session_skip() {
        let p = policy(true);
        let now = Utc::now();
        let user = user();
        let mut session = Session::anonymous(now, Duration::hours(1));
        assert!(p.current_user_requires_setup(&user, &session, now));

        session.skip_two_factor_until = Some(now + Duration::minutes(30));
        assert!(!p.current_user_requires_setup(&user, &session, now));

        // Skip lapsed
        assert!(p.current_user_requires_setup(&user, &session, now + Duration::hours(1)));
    }
}
