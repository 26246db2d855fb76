//! Login Authenticator
//!
//! Drives a session from "password pending" to "authenticated". Every call
//! loads the session, decides one transition, and saves the session back
//! with a compare-and-set, so a challenge can be completed only once.

use chrono::{DateTime, Duration, Utc};
use gate_core::types::AuthMethod;
use gate_core::{GateError, GateResult, INVALID_LOGIN_MESSAGE};
use gate_models::User;
use tracing::{debug, info};
use validator::Validate;

use crate::challenge::{ChallengePurpose, ChallengeState, ChallengeStore};
use crate::context::AuthContext;
use crate::lockout::LockoutTracker;
use crate::policy::TwoFactorPolicy;
use crate::requests::{ChallengePrompt, LoginState, PrimaryCredential, SecondFactorAttempt};
use crate::session::Session;
use crate::verifier::{CredentialVerifier, RejectReason};
use crate::webauthn::{WebAuthnCoordinator, WebAuthnVerification};

pub const ACCOUNT_LOCKED_MESSAGE: &str = "Your account is locked.";
pub const UNCONFIRMED_MESSAGE: &str = "You have to confirm your email address before continuing.";
pub const INVALID_OTP_ALERT: &str = "Invalid two-factor code.";
pub const WEBAUTHN_FAILED_ALERT: &str = "Authentication via WebAuthn device failed.";

/// Message shown when `user` may not sign in
pub fn locked_out_message(user: &User, now: DateTime<Utc>) -> &'static str {
    if user.is_access_locked(now) {
        ACCOUNT_LOCKED_MESSAGE
    } else if !user.is_confirmed() {
        UNCONFIRMED_MESSAGE
    } else {
        INVALID_LOGIN_MESSAGE
    }
}

pub(crate) fn failure_alert(method: AuthMethod) -> &'static str {
    match method {
        AuthMethod::WebAuthn => WEBAUTHN_FAILED_ALERT,
        AuthMethod::Otp | AuthMethod::Password => INVALID_OTP_ALERT,
    }
}

/// Load a live session or report the flow as stale
pub(crate) fn load_session(ctx: &AuthContext, session_id: &str, now: DateTime<Utc>) -> GateResult<Session> {
    match ctx.sessions.get(session_id)? {
        Some(session) if session.is_valid(now) => Ok(session),
        _ => Err(GateError::StaleChallenge),
    }
}

/// Drop the challenge for `purpose` on a best-effort basis
pub(crate) fn abandon_challenge(
    ctx: &AuthContext,
    challenges: &ChallengeStore,
    mut session: Session,
    purpose: ChallengePurpose,
) {
    if challenges.clear(&mut session, purpose) {
        if let Err(err) = ctx.sessions.save(session) {
            debug!(error = %err, purpose = purpose.as_str(), "Could not clear stale challenge");
        }
    }
}

pub struct LoginAuthenticator {
    ctx: AuthContext,
    verifier: CredentialVerifier,
    challenges: ChallengeStore,
    coordinator: WebAuthnCoordinator,
    policy: TwoFactorPolicy,
    lockout: LockoutTracker,
}

impl LoginAuthenticator {
    pub fn new(ctx: AuthContext) -> Self {
        Self {
            verifier: ctx.verifier(),
            challenges: ctx.challenge_store(),
            coordinator: ctx.coordinator(),
            policy: ctx.policy(),
            lockout: ctx.lockout(),
            ctx,
        }
    }

    /// Check login and password and decide what the session needs next
    pub async fn attempt_primary_credential(
        &self,
        session_id: &str,
        credential: &PrimaryCredential,
    ) -> GateResult<LoginState> {
        if credential.validate().is_err() {
            return Err(GateError::InvalidCredential);
        }

        let now = self.ctx.clock.now();
        let mut session = load_session(&self.ctx, session_id, now)?;
        let ip = session.ip_address.clone();

        let Some(user) = self.ctx.users.find_by_login(&credential.login).await? else {
            log_failed_login(&credential.login, AuthMethod::Password, ip.as_deref());
            return Err(GateError::InvalidCredential);
        };

        if !self.verifier.verify_password(&user, &credential.password) {
            log_failed_login(&user.login, AuthMethod::Password, ip.as_deref());
            self.lockout
                .record_failure(&user, AuthMethod::Password, now, ip.as_deref())
                .await?;
            return Err(GateError::InvalidCredential);
        }

        // A new password step supersedes whatever this session held before
        self.challenges.clear(&mut session, ChallengePurpose::Login);
        session.locked_out_user = None;

        if !user.can_log_in(now) {
            return self.lock_out(session, &user, locked_out_message(&user, now));
        }

        if self.policy.has_usable_factor(&user) {
            let mut state = self.challenges.begin(ChallengePurpose::Login, &user, now);
            state.remember_me = credential.remember_me;
            let prompt = self.prompt(&user, &mut state, None);
            self.challenges.install(&mut session, state);
            self.ctx.sessions.save(session)?;

            debug!(user_id = user.id, purpose = "login", "Second factor challenge issued");
            return Ok(LoginState::ChallengeIssued(prompt));
        }

        let mut enrollment_due = false;
        if self.policy.user_requires_setup(&user) {
            let started = self.ctx.users.begin_otp_grace_period(user.id, now).await?;
            let stamped = User {
                otp_grace_period_started_at: Some(started),
                ..user.clone()
            };
            enrollment_due = self.policy.grace_period_remaining(&stamped, now) <= Duration::zero();
        }

        self.lockout.record_success(&user, now).await?;
        session.user_id = Some(user.id);
        session.remember_me = credential.remember_me;
        self.ctx.sessions.save(session)?;

        info!(user_id = user.id, "Successful login without second factor");
        if enrollment_due {
            Ok(LoginState::EnrollmentRequired {
                user_id: user.id,
                grace_remaining: Duration::zero(),
            })
        } else {
            Ok(LoginState::Authenticated {
                user_id: user.id,
                remember_me: credential.remember_me,
            })
        }
    }

    /// Answer the outstanding login challenge with one second factor
    pub async fn attempt_second_factor(
        &self,
        session_id: &str,
        attempt: SecondFactorAttempt,
    ) -> GateResult<LoginState> {
        let now = self.ctx.clock.now();
        let mut session = load_session(&self.ctx, session_id, now)?;

        if session.locked_out_user.is_some() {
            return Err(GateError::account_locked(ACCOUNT_LOCKED_MESSAGE));
        }
        let Some(mut state) = session.login_challenge.clone() else {
            return Err(GateError::StaleChallenge);
        };

        let user = match self.ctx.users.find(state.subject_user_id).await? {
            Some(user) if self.challenges.validate(&state, &user, now).is_valid() => user,
            _ => {
                debug!(user_id = state.subject_user_id, "Login challenge is stale");
                abandon_challenge(&self.ctx, &self.challenges, session, ChallengePurpose::Login);
                return Err(GateError::StaleChallenge);
            }
        };

        if !user.can_log_in(now) {
            return self.lock_out(session, &user, locked_out_message(&user, now));
        }

        let ip = session.ip_address.clone();
        let method = attempt.method();
        let verified = match &attempt {
            SecondFactorAttempt::Otp(code) => self.verifier.verify_otp(&user, code, now),
            SecondFactorAttempt::WebAuthn(response) => {
                let result = self
                    .coordinator
                    .verify_assertion(&user, &mut state, response)
                    .await?;
                if let WebAuthnVerification::Rejected(RejectReason::CounterRegression { stored, presented }) =
                    result
                {
                    self.lockout
                        .record_counter_regression(&user, stored, presented, now, ip.as_deref());
                }
                result.is_verified()
            }
        };

        if verified {
            self.lockout.record_success(&user, now).await?;
            self.challenges.clear(&mut session, ChallengePurpose::Login);
            session.user_id = Some(user.id);
            session.remember_me = state.remember_me;
            self.ctx.sessions.save(session)?;

            info!(user_id = user.id, method = method.as_str(), "Successful login");
            return Ok(LoginState::Authenticated {
                user_id: user.id,
                remember_me: state.remember_me,
            });
        }

        log_failed_login(&user.login, method, ip.as_deref());
        let locked = self
            .lockout
            .record_failure(&user, method, now, ip.as_deref())
            .await?;
        if locked {
            return self.lock_out(session, &user, ACCOUNT_LOCKED_MESSAGE);
        }

        state.failed_attempts += 1;
        let prompt = self.prompt(&user, &mut state, Some(failure_alert(method)));
        self.challenges.install(&mut session, state);
        self.ctx.sessions.save(session)?;
        Ok(LoginState::ChallengeIssued(prompt))
    }

    /// Whether the signed-in user still owes a second factor enrollment
    pub async fn current_user_requires_setup(&self, session_id: &str) -> GateResult<bool> {
        let now = self.ctx.clock.now();
        let session = load_session(&self.ctx, session_id, now)?;
        let user = self.signed_in_user(&session).await?;
        Ok(self.policy.current_user_requires_setup(&user, &session, now))
    }

    /// Postpone enrollment for the rest of the grace period. Returns when
    /// the deferral ends.
    pub async fn skip_two_factor_setup(&self, session_id: &str) -> GateResult<DateTime<Utc>> {
        let now = self.ctx.clock.now();
        let mut session = load_session(&self.ctx, session_id, now)?;
        let user = self.signed_in_user(&session).await?;

        if !self.policy.is_skippable(&user, now) {
            return Err(GateError::policy("Two-factor setup can no longer be skipped"));
        }
        let until = now + self.policy.grace_period_remaining(&user, now);
        session.skip_two_factor_until = Some(until);
        self.ctx.sessions.save(session)?;

        info!(user_id = user.id, until = %until, "Two-factor setup skipped");
        Ok(until)
    }

    async fn signed_in_user(&self, session: &Session) -> GateResult<User> {
        let Some(user_id) = session.user_id else {
            return Err(GateError::policy("You need to sign in first"));
        };
        self.ctx
            .users
            .find(user_id)
            .await?
            .ok_or(GateError::StaleChallenge)
    }

    fn prompt(&self, user: &User, state: &mut ChallengeState, alert: Option<&str>) -> ChallengePrompt {
        ChallengePrompt {
            purpose: state.purpose,
            otp_available: user.otp_active(),
            webauthn: self.coordinator.issue(user, state),
            alert: alert.map(str::to_string),
        }
    }

    fn lock_out(&self, mut session: Session, user: &User, message: &str) -> GateResult<LoginState> {
        self.challenges.clear(&mut session, ChallengePurpose::Login);
        session.locked_out_user = Some(user.id);
        self.ctx.sessions.save(session)?;
        Ok(LoginState::LockedOut {
            message: message.to_string(),
        })
    }
}

fn log_failed_login(login: &str, method: AuthMethod, ip: Option<&str>) {
    info!(
        user = login,
        method = method.as_str(),
        ip = ip.unwrap_or("unknown"),
        "Failed Login"
    );
}
