//! Typed inputs and outputs of the authentication flows

use chrono::Duration;
use gate_core::traits::Id;
use gate_core::types::AuthMethod;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::admin_mode::AdminModeSession;
use crate::challenge::ChallengePurpose;
use crate::webauthn::AssertionRequest;

/// Login and password, validated at the boundary
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PrimaryCredential {
    #[validate(length(min = 1, max = 255))]
    pub login: String,

    #[validate(length(min = 1, max = 1024))]
    pub password: String,

    #[serde(default)]
    pub remember_me: bool,
}

impl PrimaryCredential {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            remember_me: false,
        }
    }
}

/// Exactly one second factor per attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactorAttempt {
    Otp(String),
    /// Raw JSON of the browser's assertion response
    WebAuthn(String),
}

impl SecondFactorAttempt {
    pub fn method(&self) -> AuthMethod {
        match self {
            SecondFactorAttempt::Otp(_) => AuthMethod::Otp,
            SecondFactorAttempt::WebAuthn(_) => AuthMethod::WebAuthn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepUpAttempt {
    /// For administrators without an enrolled second factor
    Password(String),
    SecondFactor(SecondFactorAttempt),
}

impl StepUpAttempt {
    pub fn method(&self) -> AuthMethod {
        match self {
            StepUpAttempt::Password(_) => AuthMethod::Password,
            StepUpAttempt::SecondFactor(attempt) => attempt.method(),
        }
    }
}

/// What the client has to render to continue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengePrompt {
    pub purpose: ChallengePurpose,
    pub otp_available: bool,
    pub webauthn: Option<AssertionRequest>,
    /// Set after a failed attempt
    pub alert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginState {
    ChallengeIssued(ChallengePrompt),
    Authenticated {
        user_id: Id,
        remember_me: bool,
    },
    /// Signed in, but must enroll a second factor before anything else
    EnrollmentRequired {
        user_id: Id,
        #[serde(serialize_with = "serialize_seconds")]
        grace_remaining: Duration,
    },
    LockedOut {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepUpState {
    ChallengeIssued(ChallengePrompt),
    PasswordRequired {
        alert: Option<String>,
    },
    AdminModeEnabled {
        session: AdminModeSession,
        redirect_path: String,
    },
    LockedOut {
        message: String,
    },
}

fn serialize_seconds<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_validation() {
        assert!(PrimaryCredential::new("alice", "correct-horse").validate().is_ok());
        assert!(PrimaryCredential::new("", "correct-horse").validate().is_err());
        assert!(PrimaryCredential::new("alice", "").validate().is_err());
        assert!(PrimaryCredential::new("a".repeat(256), "x").validate().is_err());
    }

    #[test]
    fn test_methods() {
        assert_eq!(SecondFactorAttempt::Otp("1".into()).method(), AuthMethod::Otp);
        assert_eq!(
            StepUpAttempt::SecondFactor(SecondFactorAttempt::WebAuthn("{}".into())).method(),
            AuthMethod::WebAuthn
        );
        assert_eq!(StepUpAttempt::Password("p".into()).method(), AuthMethod::Password);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(LoginState::Authenticated {
            user_id: 1,
            remember_me: true,
        })
        .unwrap();
        assert_eq!(json["state"], "authenticated");
        assert_eq!(json["user_id"], 1);

        let json = serde_json::to_value(LoginState::EnrollmentRequired {
            user_id: 1,
            grace_remaining: Duration::zero(),
        })
        .unwrap();
        assert_eq!(json["grace_remaining"], 0);
    }
}
