//! Security notification model

use chrono::{DateTime, Utc};
use gate_core::traits::Id;
use gate_core::types::AuthMethod;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEvent {
    /// Correct password, wrong one-time code
    TwoFactorOtpAttemptFailed,
    /// Failed attempts reached the lockout threshold
    AccountLocked,
    /// A security key presented a signature counter that did not advance
    PossibleClonedCredential,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoFactorOtpAttemptFailed => "two_factor_otp_attempt_failed",
            Self::AccountLocked => "account_locked",
            Self::PossibleClonedCredential => "possible_cloned_credential",
        }
    }
}

/// A notification addressed to the account owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityNotification {
    pub id: Uuid,
    pub event: SecurityEvent,
    pub user_id: Id,
    pub login: String,
    pub recipient_email: String,
    pub method: Option<AuthMethod>,
    pub ip_address: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityNotification {
    pub fn new(
        event: SecurityEvent,
        user_id: Id,
        login: impl Into<String>,
        recipient_email: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            user_id,
            login: login.into(),
            recipient_email: recipient_email.into(),
            method: None,
            ip_address: None,
            locked_until: None,
            occurred_at,
        }
    }

    pub fn method(mut self, method: AuthMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn ip_address(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    pub fn locked_until(mut self, until: Option<DateTime<Utc>>) -> Self {
        self.locked_until = until;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let now = Utc::now();
        let n = SecurityNotification::new(
            SecurityEvent::AccountLocked,
            1,
            "alice",
            "alice@example.com",
            now,
        )
        .method(AuthMethod::Otp)
        .locked_until(Some(now));

        assert_eq!(n.event.as_str(), "account_locked");
        assert_eq!(n.method, Some(AuthMethod::Otp));
        assert_eq!(n.locked_until, Some(now));
        assert!(n.ip_address.is_none());
    }
}
