//! Core error types for Gate
//!
//! Every failure path of an authentication flow resolves to exactly one of
//! these kinds.

use thiserror::Error;

/// Generic message for any credential mismatch. Never names the factor.
pub const INVALID_LOGIN_MESSAGE: &str = "Invalid login or password";

/// Message shown when a flow has to be restarted from the password step.
pub const SIGN_IN_AGAIN_MESSAGE: &str = "An error occurred. Please sign in again.";

/// Core error type for all Gate operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Password, OTP, or WebAuthn mismatch
    #[error("Invalid login or password")]
    InvalidCredential,

    /// The challenge no longer matches the principal (password changed,
    /// challenge expired, or a concurrent request consumed it)
    #[error("An error occurred. Please sign in again.")]
    StaleChallenge,

    /// Terminal for the session
    #[error("{message}")]
    AccountLocked { message: String },

    /// The caller is not allowed to perform the operation at all
    #[error("Policy violation: {message}")]
    PolicyViolation { message: String },

    /// Storage or notification infrastructure unavailable
    #[error("Transport failure: {service} - {message}")]
    Transport { service: String, message: String },

    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateError {
    pub fn account_locked(message: impl Into<String>) -> Self {
        GateError::AccountLocked {
            message: message.into(),
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        GateError::PolicyViolation {
            message: message.into(),
        }
    }

    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        GateError::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Only infrastructure failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::Transport { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GateError::InvalidCredential => 401,
            GateError::StaleChallenge => 409,
            GateError::AccountLocked { .. } => 423,
            GateError::PolicyViolation { .. } => 403,
            GateError::Transport { .. } => 503,
            GateError::NotFound { .. } => 404,
            GateError::Config(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GateError::InvalidCredential => "invalid_credential",
            GateError::StaleChallenge => "stale_challenge",
            GateError::AccountLocked { .. } => "account_locked",
            GateError::PolicyViolation { .. } => "policy_violation",
            GateError::Transport { .. } => "transport_failure",
            GateError::NotFound { .. } => "not_found",
            GateError::Config(_) => "configuration_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(GateError::transport("users", "connection refused").is_retryable());
        assert!(!GateError::InvalidCredential.is_retryable());
        assert!(!GateError::StaleChallenge.is_retryable());
        assert!(!GateError::account_locked("locked").is_retryable());
        assert!(!GateError::policy("not an admin").is_retryable());
    }

    #[test]
    fn test_messages_do_not_name_the_factor() {
        assert_eq!(GateError::InvalidCredential.to_string(), INVALID_LOGIN_MESSAGE);
        assert_eq!(GateError::StaleChallenge.to_string(), SIGN_IN_AGAIN_MESSAGE);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GateError::InvalidCredential.status_code(), 401);
        assert_eq!(GateError::account_locked("x").status_code(), 423);
        assert_eq!(GateError::policy("x").status_code(), 403);
        assert_eq!(GateError::transport("db", "x").status_code(), 503);
        assert_eq!(GateError::StaleChallenge.error_code(), "stale_challenge");
    }
}
