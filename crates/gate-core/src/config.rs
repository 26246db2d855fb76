//! Configuration types and loading
//!
//! Every section falls back to its defaults, so a partial TOML file or a
//! handful of environment variables is enough to boot.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub two_factor: TwoFactorConfig,
    pub lockout: LockoutConfig,
    pub webauthn: WebAuthnConfig,
    pub admin_mode: AdminModeConfig,
    pub challenge: ChallengeConfig,
    pub session: SessionConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty means "run without a database" (in-memory user store)
    pub url: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TwoFactorConfig {
    /// Every user must enroll a second factor
    pub required_globally: bool,
    /// Hours a user may keep skipping enrollment once required
    pub grace_period_hours: i64,
    pub otp_digits: usize,
    pub otp_period_seconds: u64,
    /// Accepted clock drift, in time steps either side of now
    pub otp_allowed_drift_steps: u8,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            required_globally: false,
            grace_period_hours: 48,
            otp_digits: 6,
            otp_period_seconds: 30,
            otp_allowed_drift_steps: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub maximum_attempts: i32,
    pub unlock_in_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            maximum_attempts: 10,
            unlock_in_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebAuthnConfig {
    pub enabled: bool,
    /// Relying party id, normally the bare host name
    pub rp_id: String,
    /// Expected `origin` in the client data
    pub origin: String,
    /// Legacy U2F app id, sent as the `appid` extension when set
    pub app_id: Option<String>,
    pub challenge_bytes: usize,
    pub timeout_ms: u64,
}

impl Default for WebAuthnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rp_id: "localhost".to_string(),
            origin: "http://localhost:8080".to_string(),
            app_id: None,
            challenge_bytes: 32,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminModeConfig {
    pub enabled: bool,
    pub session_minutes: i64,
}

impl Default for AdminModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_minutes: 360,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub ttl_minutes: i64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self { ttl_minutes: 15 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub lifetime_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_minutes: 7 * 24 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailConfig {
    pub from_address: String,
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: "gate@example.com".to_string(),
            from_name: "Gate".to_string(),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Config file error: {0}")]
    FileError(String),
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for crate::GateError {
    fn from(err: ConfigError) -> Self {
        crate::GateError::Config(err.to_string())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from `GATE_*` environment variables on top of the
    /// defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Server
        if let Ok(host) = std::env::var("GATE_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse("GATE_PORT")? {
            config.server.port = port;
        }

        // Database - DATABASE_URL is honoured for compatibility with hosting platforms
        if let Ok(url) = std::env::var("GATE_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            config.database.url = url;
        }
        if let Some(size) = env_parse("GATE_DATABASE_POOL_SIZE")? {
            config.database.pool_size = size;
        }

        // Two-factor
        if let Ok(v) = std::env::var("GATE_TWO_FACTOR_REQUIRED") {
            config.two_factor.required_globally = parse_bool(&v);
        }
        if let Some(hours) = env_parse("GATE_TWO_FACTOR_GRACE_PERIOD_HOURS")? {
            config.two_factor.grace_period_hours = hours;
        }
        if let Some(digits) = env_parse("GATE_OTP_DIGITS")? {
            config.two_factor.otp_digits = digits;
        }

        // Lockout
        if let Some(attempts) = env_parse("GATE_LOCKOUT_MAXIMUM_ATTEMPTS")? {
            config.lockout.maximum_attempts = attempts;
        }
        if let Some(minutes) = env_parse("GATE_LOCKOUT_UNLOCK_IN_MINUTES")? {
            config.lockout.unlock_in_minutes = minutes;
        }

        // WebAuthn
        if let Ok(v) = std::env::var("GATE_WEBAUTHN_ENABLED") {
            config.webauthn.enabled = parse_bool(&v);
        }
        if let Ok(rp_id) = std::env::var("GATE_WEBAUTHN_RP_ID") {
            config.webauthn.rp_id = rp_id;
        }
        if let Ok(origin) = std::env::var("GATE_WEBAUTHN_ORIGIN") {
            config.webauthn.origin = origin;
        }
        if let Ok(app_id) = std::env::var("GATE_WEBAUTHN_APP_ID") {
            config.webauthn.app_id = Some(app_id);
        }

        // Admin mode
        if let Ok(v) = std::env::var("GATE_ADMIN_MODE_ENABLED") {
            config.admin_mode.enabled = parse_bool(&v);
        }
        if let Some(minutes) = env_parse("GATE_ADMIN_MODE_SESSION_MINUTES")? {
            config.admin_mode.session_minutes = minutes;
        }

        if let Some(minutes) = env_parse("GATE_CHALLENGE_TTL_MINUTES")? {
            config.challenge.ttl_minutes = minutes;
        }

        // Email
        if let Ok(from) = std::env::var("GATE_EMAIL_FROM") {
            config.email.from_address = from;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the authenticators cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webauthn.challenge_bytes < 16 {
            return Err(ConfigError::invalid(
                "webauthn.challenge_bytes",
                "must be at least 16",
            ));
        }
        if self.webauthn.enabled && self.webauthn.rp_id.trim().is_empty() {
            return Err(ConfigError::invalid("webauthn.rp_id", "must not be empty"));
        }
        if self.lockout.maximum_attempts <= 0 {
            return Err(ConfigError::invalid(
                "lockout.maximum_attempts",
                "must be positive",
            ));
        }
        if !(6..=8).contains(&self.two_factor.otp_digits) {
            return Err(ConfigError::invalid(
                "two_factor.otp_digits",
                "must be between 6 and 8",
            ));
        }
        if self.two_factor.otp_period_seconds == 0 {
            return Err(ConfigError::invalid(
                "two_factor.otp_period_seconds",
                "must be positive",
            ));
        }
        if self.challenge.ttl_minutes <= 0 {
            return Err(ConfigError::invalid(
                "challenge.ttl_minutes",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Get the server address
    pub fn server_addr(&self) -> std::net::SocketAddr {
        use std::net::SocketAddr;
        let ip: std::net::IpAddr = self.server.host.parse().unwrap_or([0, 0, 0, 0].into());
        SocketAddr::new(ip, self.server.port)
    }

    pub fn has_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.lockout.maximum_attempts, 10);
        assert_eq!(config.two_factor.otp_allowed_drift_steps, 1);
        assert_eq!(config.webauthn.challenge_bytes, 32);
        assert!(config.validate().is_ok());
        assert!(!config.has_database());
    }

    #[test]
    fn test_validate_rejects_short_challenge() {
        let mut config = AppConfig::default();
        config.webauthn.challenge_bytes = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "webauthn.challenge_bytes"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = AppConfig::default();
        config.lockout.maximum_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.two_factor.otp_digits = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"lockout": {"maximum_attempts": 5}}"#).unwrap();
        assert_eq!(config.lockout.maximum_attempts, 5);
        assert_eq!(config.lockout.unlock_in_minutes, 10);
        assert_eq!(config.admin_mode.session_minutes, 360);
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig::default();
        assert_eq!(config.server_addr().port(), 8080);
    }
}
