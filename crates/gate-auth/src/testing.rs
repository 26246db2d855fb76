//! Fixtures for the authenticator tests

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use gate_core::config::AppConfig;
use gate_core::traits::FixedClock;
use gate_models::{MemoryUserStore, User};
use gate_notifications::RecordingNotifier;

use crate::context::AuthContext;
use crate::session::{MemorySessionStore, Session, SessionStore};
use crate::verifier::test_support::{webauthn_config, SoftKey};
use crate::verifier::{PasswordVerifier, TotpVerifier};

pub const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
pub const PASSWORD: &str = "correct-horse";

/// Stored hash is "plain:<password>"; keeps tests away from Argon2 cost
pub struct PlainPasswords;

impl PasswordVerifier for PlainPasswords {
    fn verify(&self, candidate: &str, stored_hash: &str) -> bool {
        stored_hash.strip_prefix("plain:") == Some(candidate)
    }
}

pub fn plain(password: &str) -> String {
    format!("plain:{}", password)
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub struct Fixture {
    pub ctx: AuthContext,
    pub users: Arc<MemoryUserStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub notifier: RecordingNotifier,
    pub clock: Arc<FixedClock>,
}

impl Fixture {
    pub fn new(config: AppConfig, users: Vec<User>) -> Self {
        let users = Arc::new(MemoryUserStore::with_users(users));
        let sessions = Arc::new(MemorySessionStore::new());
        let notifier = RecordingNotifier::new();
        let clock = Arc::new(FixedClock::new(start()));

        let ctx = AuthContext::new(config, users.clone(), sessions.clone(), Arc::new(notifier.clone()))
            .with_clock(clock.clone())
            .with_password_verifier(Arc::new(PlainPasswords));

        Self {
            ctx,
            users,
            sessions,
            notifier,
            clock,
        }
    }

    pub fn session(&self) -> String {
        self.ctx.start_session(Some("10.0.0.1".to_string())).unwrap().id
    }

    pub fn stored_session(&self, id: &str) -> Session {
        self.sessions.get(id).unwrap().unwrap()
    }

    /// Session already signed in as `user_id`
    pub fn signed_in(&self, user_id: i64) -> String {
        let mut session = self.ctx.start_session(None).unwrap();
        session.user_id = Some(user_id);
        self.sessions.save(session).unwrap().id
    }

    pub fn otp(&self) -> String {
        TotpVerifier::new(&self.ctx.config.two_factor)
            .generate(SECRET, self.clock_now())
            .unwrap()
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use gate_core::traits::Clock;
        self.clock.now()
    }
}

pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.webauthn = webauthn_config();
    config.lockout.maximum_attempts = 5;
    config
}

/// Enrolled with OTP
pub fn alice() -> User {
    let mut user = User::new(1, "alice", "alice@example.com", plain(PASSWORD));
    user.otp_secret = Some(SECRET.to_string());
    user.otp_enabled = true;
    user
}

/// Administrator enrolled with a security key
pub fn admin(key: &SoftKey) -> User {
    let mut user = User::new(2, "root", "root@example.com", plain(PASSWORD));
    user.admin = true;
    user.webauthn_registrations.push(key.registration(20, 2, 0));
    user
}

/// No second factor at all
pub fn bob() -> User {
    User::new(3, "bob", "bob@example.com", plain(PASSWORD))
}
