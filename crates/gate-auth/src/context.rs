//! Collaborators shared by the authenticators

use std::sync::Arc;

use chrono::Duration;
use gate_core::config::AppConfig;
use gate_core::traits::{Clock, RandomSource, SystemClock};
use gate_models::UserStore;
use gate_notifications::Notifier;

use crate::challenge::ChallengeStore;
use crate::lockout::LockoutTracker;
use crate::policy::TwoFactorPolicy;
use crate::random::OsRandom;
use crate::session::{Session, SessionStore};
use crate::verifier::{Argon2PasswordVerifier, CredentialVerifier, PasswordVerifier};
use crate::webauthn::WebAuthnCoordinator;

/// Everything an authenticator needs from the outside world
#[derive(Clone)]
pub struct AuthContext {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub passwords: Arc<dyn PasswordVerifier>,
}

impl AuthContext {
    /// Production defaults for clock, randomness and password hashing
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            users,
            sessions,
            notifier,
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            passwords: Arc::new(Argon2PasswordVerifier),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_password_verifier(mut self, passwords: Arc<dyn PasswordVerifier>) -> Self {
        self.passwords = passwords;
        self
    }

    /// A new anonymous session, stored
    pub fn start_session(&self, ip: Option<String>) -> Result<Session, crate::session::SessionError> {
        let mut session = Session::anonymous(
            self.clock.now(),
            Duration::minutes(self.config.session.lifetime_minutes),
        );
        session.ip_address = ip;
        self.sessions.create(session)
    }

    pub(crate) fn verifier(&self) -> CredentialVerifier {
        CredentialVerifier::new(
            self.passwords.clone(),
            &self.config.two_factor,
            &self.config.webauthn,
        )
    }

    pub(crate) fn challenge_store(&self) -> ChallengeStore {
        ChallengeStore::new(Duration::minutes(self.config.challenge.ttl_minutes))
    }

    pub(crate) fn coordinator(&self) -> WebAuthnCoordinator {
        WebAuthnCoordinator::new(
            self.config.webauthn.clone(),
            self.verifier(),
            self.users.clone(),
            self.random.clone(),
        )
    }

    pub(crate) fn policy(&self) -> TwoFactorPolicy {
        TwoFactorPolicy::new(self.config.two_factor.clone()).with_webauthn(self.config.webauthn.enabled)
    }

    pub(crate) fn lockout(&self) -> LockoutTracker {
        LockoutTracker::new(
            self.users.clone(),
            self.notifier.clone(),
            self.config.lockout.clone(),
        )
    }
}
