//! Common types used throughout Gate

use serde::{Deserialize, Serialize};

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Blocked,
    Deactivated,
}

impl UserStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, UserStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
            UserStatus::Deactivated => "deactivated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(UserStatus::Active),
            "blocked" => Some(UserStatus::Blocked),
            "deactivated" => Some(UserStatus::Deactivated),
            _ => None,
        }
    }
}

/// Factor a credential check was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMethod {
    Password,
    #[serde(rename = "OTP")]
    Otp,
    WebAuthn,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "Password",
            AuthMethod::Otp => "OTP",
            AuthMethod::WebAuthn => "WebAuthn",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_status_parse() {
        assert_eq!(UserStatus::parse("active"), Some(UserStatus::Active));
        assert_eq!(UserStatus::parse("blocked"), Some(UserStatus::Blocked));
        assert_eq!(UserStatus::parse("bogus"), None);
        assert_eq!(UserStatus::Deactivated.as_str(), "deactivated");
    }

    #[test]
    fn test_auth_method_display() {
        assert_eq!(AuthMethod::Otp.to_string(), "OTP");
        assert_eq!(AuthMethod::WebAuthn.to_string(), "WebAuthn");
    }
}
