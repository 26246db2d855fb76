//! User model
//!
//! Table: users

use chrono::{DateTime, Utc};
use gate_core::traits::{Id, Identifiable, Timestamped};
use gate_core::types::UserStatus;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::webauthn::WebAuthnRegistration;

/// User entity
///
/// Only the fields the authentication flows look at are modelled. The
/// password is kept as the stored hash string and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct User {
    pub id: Id,

    /// Login name (unique)
    #[validate(length(min = 1, max = 255))]
    pub login: String,

    #[validate(email)]
    pub mail: String,

    pub admin: bool,

    pub status: UserStatus,

    /// Stored password hash (PHC string)
    #[serde(skip_serializing)]
    pub encrypted_password: String,

    /// Base32 TOTP secret
    #[serde(skip_serializing)]
    pub otp_secret: Option<String>,

    pub otp_enabled: bool,

    pub webauthn_registrations: Vec<WebAuthnRegistration>,

    /// Consecutive failed attempts since the last success
    pub failed_attempts: i32,

    pub locked_until: Option<DateTime<Utc>>,

    pub confirmed_at: Option<DateTime<Utc>>,

    /// Set when a group the user belongs to enforces two-factor
    pub require_two_factor_from_group: bool,

    /// Smallest grace period among the enforcing groups
    pub group_grace_period_hours: Option<i64>,

    /// When the two-factor requirement started applying to this user
    pub otp_grace_period_started_at: Option<DateTime<Utc>>,

    pub last_sign_in_at: Option<DateTime<Utc>>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: 0,
            login: String::new(),
            mail: String::new(),
            admin: false,
            status: UserStatus::Active,
            encrypted_password: String::new(),
            otp_secret: None,
            otp_enabled: false,
            webauthn_registrations: Vec::new(),
            failed_attempts: 0,
            locked_until: None,
            confirmed_at: None,
            require_two_factor_from_group: false,
            group_grace_period_hours: None,
            otp_grace_period_started_at: None,
            last_sign_in_at: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Identifiable for User {
    fn id(&self) -> Option<Id> {
        Some(self.id)
    }
}

impl Timestamped for User {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl User {
    pub fn new(
        id: Id,
        login: impl Into<String>,
        mail: impl Into<String>,
        encrypted_password: impl Into<String>,
    ) -> Self {
        Self {
            id,
            login: login.into(),
            mail: mail.into(),
            encrypted_password: encrypted_password.into(),
            confirmed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// True while a lockout window is open
    pub fn is_access_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| now < until)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Active, confirmed, and not inside a lockout window
    pub fn can_log_in(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.is_confirmed() && !self.is_access_locked(now)
    }

    pub fn otp_active(&self) -> bool {
        self.otp_enabled && self.otp_secret.as_deref().map_or(false, |s| !s.is_empty())
    }

    pub fn webauthn_enabled(&self) -> bool {
        !self.webauthn_registrations.is_empty()
    }

    /// At least one second factor is enrolled
    pub fn two_factor_enabled(&self) -> bool {
        self.otp_active() || self.webauthn_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> User {
        User::new(1, "alice", "alice@example.com", "$argon2id$stub")
    }

    #[test]
    fn test_lock_window() {
        let now = Utc::now();
        let mut user = user();
        assert!(user.can_log_in(now));

        user.locked_until = Some(now + Duration::minutes(10));
        assert!(user.is_access_locked(now));
        assert!(!user.can_log_in(now));

        // Lock has lapsed
        assert!(!user.is_access_locked(now + Duration::minutes(10)));
    }

    #[test]
    fn test_unconfirmed_or_blocked_cannot_log_in() {
        let now = Utc::now();
        let mut user = user();
        user.confirmed_at = None;
        assert!(!user.can_log_in(now));

        let mut user = self::user();
        user.status = UserStatus::Blocked;
        assert!(!user.can_log_in(now));
    }

    #[test]
    fn test_two_factor_enabled() {
        let mut user = user();
        assert!(!user.two_factor_enabled());

        // Enabled flag without a secret does not count
        user.otp_enabled = true;
        assert!(!user.otp_active());

        user.otp_secret = Some("JBSWY3DPEHPK3PXP".to_string());
        assert!(user.two_factor_enabled());
    }

    #[test]
    fn test_validation() {
        let mut user = user();
        assert!(user.validate().is_ok());
        user.mail = "not-an-address".to_string();
        assert!(user.validate().is_err());
    }
}
