//! Admin-Mode Step-Up Authenticator
//!
//! An administrator who is already signed in re-proves a factor before the
//! session gains admin privileges. The step-up challenge has its own session
//! slot, and its failures are counted on the session across step-up
//! requests; neither touches the login flow.

use chrono::{DateTime, Duration, Utc};
use gate_core::traits::Id;
use gate_core::{GateError, GateResult, INVALID_LOGIN_MESSAGE};
use gate_models::User;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::challenge::{ChallengePurpose, ChallengeStore};
use crate::context::AuthContext;
use crate::lockout::LockoutTracker;
use crate::login::{abandon_challenge, failure_alert, load_session};
use crate::policy::TwoFactorPolicy;
use crate::requests::{ChallengePrompt, SecondFactorAttempt, StepUpAttempt, StepUpState};
use crate::session::Session;
use crate::verifier::{CredentialVerifier, RejectReason};
use crate::webauthn::{WebAuthnCoordinator, WebAuthnVerification};

pub const STEP_UP_LOCKED_MESSAGE: &str =
    "Too many failed attempts. Admin mode is locked for this session.";
pub const DEFAULT_REDIRECT_PATH: &str = "/admin";

/// Pages that must never be the target after enabling admin mode
const EXCLUDED_RETURN_PATHS: [&str; 2] = ["/admin/session", "/admin/session/new"];

/// Elevated privileges granted by a successful step-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminModeSession {
    pub user_id: Id,
    pub enabled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AdminModeSession {
    pub fn start(user_id: Id, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            user_id,
            enabled_at: now,
            expires_at: now + lifetime,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Where to send the browser once admin mode is on. Only local paths are
/// honoured.
pub fn redirect_path(return_to: Option<&str>) -> String {
    match return_to {
        Some(path) if is_allowed_return_path(path) => path.to_string(),
        _ => DEFAULT_REDIRECT_PATH.to_string(),
    }
}

fn is_allowed_return_path(path: &str) -> bool {
    if !path.starts_with('/') || path.starts_with("//") || path.contains('\\') {
        return false;
    }
    let bare = path.split(['?', '#']).next().unwrap_or(path);
    let bare = bare.trim_end_matches('/');
    !EXCLUDED_RETURN_PATHS.contains(&bare)
}

/// Admin mode on `session`, if it is still running and belongs to the
/// signed-in user
pub fn admin_mode_active(session: &Session, now: DateTime<Utc>) -> bool {
    session
        .admin_mode
        .as_ref()
        .map_or(false, |admin| Some(admin.user_id) == session.user_id && admin.is_active(now))
}

pub struct AdminModeAuthenticator {
    ctx: AuthContext,
    verifier: CredentialVerifier,
    challenges: ChallengeStore,
    coordinator: WebAuthnCoordinator,
    policy: TwoFactorPolicy,
    lockout: LockoutTracker,
}

impl AdminModeAuthenticator {
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

    /// Begin a fresh step-up. Any earlier step-up challenge is discarded,
    /// earlier failures still count.
    pub async fn request_step_up(&self, session_id: &str, return_to: Option<&str>) -> GateResult<StepUpState> {
        let now = self.ctx.clock.now();
        let mut session = load_session(&self.ctx, session_id, now)?;
        let user = self.eligible_admin(&session).await?;

        session.release_lapsed_step_up_lock(now);
        if session.step_up_locked(now) {
            return Err(GateError::account_locked(STEP_UP_LOCKED_MESSAGE));
        }

        let mut state = self
            .challenges
            .begin(ChallengePurpose::AdminModeStepUp, &user, now);
        let next = if self.policy.has_usable_factor(&user) {
            StepUpState::ChallengeIssued(ChallengePrompt {
                purpose: ChallengePurpose::AdminModeStepUp,
                otp_available: user.otp_active(),
                webauthn: self.coordinator.issue(&user, &mut state),
                alert: None,
            })
        } else {
            StepUpState::PasswordRequired { alert: None }
        };

        self.challenges.install(&mut session, state);
        session.admin_mode_return_to = return_to.map(str::to_string);
        self.ctx.sessions.save(session)?;

        debug!(user_id = user.id, purpose = "admin_mode_step_up", "Step-up challenge issued");
        Ok(next)
    }

    /// Answer the outstanding step-up challenge
    pub async fn attempt_step_up(&self, session_id: &str, attempt: StepUpAttempt) -> GateResult<StepUpState> {
        let now = self.ctx.clock.now();
        let mut session = load_session(&self.ctx, session_id, now)?;

        session.release_lapsed_step_up_lock(now);
        if session.step_up_locked(now) {
            return Err(GateError::account_locked(STEP_UP_LOCKED_MESSAGE));
        }
        let user = self.eligible_admin(&session).await?;
        let Some(mut state) = session.step_up_challenge.clone() else {
            return Err(GateError::StaleChallenge);
        };
        if !self.challenges.validate(&state, &user, now).is_valid() {
            debug!(user_id = user.id, "Step-up challenge is stale");
            abandon_challenge(
                &self.ctx,
                &self.challenges,
                session,
                ChallengePurpose::AdminModeStepUp,
            );
            return Err(GateError::StaleChallenge);
        }

        let ip = session.ip_address.clone();
        let method = attempt.method();
        let verified = match &attempt {
            // Password re-entry only stands in for a factor the user lacks
            StepUpAttempt::Password(password) => {
                !self.policy.has_usable_factor(&user) && self.verifier.verify_password(&user, password)
            }
            StepUpAttempt::SecondFactor(SecondFactorAttempt::Otp(code)) => {
                self.verifier.verify_otp(&user, code, now)
            }
            StepUpAttempt::SecondFactor(SecondFactorAttempt::WebAuthn(response)) => {
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
            self.challenges
                .clear(&mut session, ChallengePurpose::AdminModeStepUp);
            let admin = AdminModeSession::start(
                user.id,
                now,
                Duration::minutes(self.ctx.config.admin_mode.session_minutes),
            );
            let redirect = redirect_path(session.admin_mode_return_to.take().as_deref());
            session.admin_mode = Some(admin.clone());
            session.step_up_locked_until = None;
            session.step_up_failed_attempts = 0;
            self.ctx.sessions.save(session)?;

            info!(user_id = user.id, method = method.as_str(), "Admin mode enabled");
            return Ok(StepUpState::AdminModeEnabled {
                session: admin,
                redirect_path: redirect,
            });
        }

        info!(
            user = %user.login,
            method = method.as_str(),
            ip = ip.as_deref().unwrap_or("unknown"),
            "Failed Admin Mode Login"
        );
        if method == gate_core::types::AuthMethod::Otp {
            self.lockout.notify_otp_failure(&user, now, ip.as_deref());
        }

        state.failed_attempts += 1;
        session.step_up_failed_attempts += 1;
        if session.step_up_failed_attempts >= self.lockout.maximum_attempts() {
            let until = now + self.lockout.lock_duration();
            self.challenges
                .clear(&mut session, ChallengePurpose::AdminModeStepUp);
            session.step_up_locked_until = Some(until);
            self.ctx.sessions.save(session)?;

            warn!(user_id = user.id, until = %until, "Admin mode step-up locked for session");
            return Ok(StepUpState::LockedOut {
                message: STEP_UP_LOCKED_MESSAGE.to_string(),
            });
        }

        let next = if self.policy.has_usable_factor(&user) {
            StepUpState::ChallengeIssued(ChallengePrompt {
                purpose: ChallengePurpose::AdminModeStepUp,
                otp_available: user.otp_active(),
                webauthn: self.coordinator.issue(&user, &mut state),
                alert: Some(failure_alert(method).to_string()),
            })
        } else {
            StepUpState::PasswordRequired {
                alert: Some(INVALID_LOGIN_MESSAGE.to_string()),
            }
        };
        self.challenges.install(&mut session, state);
        self.ctx.sessions.save(session)?;
        Ok(next)
    }

    /// Running admin mode of the session, if any
    pub fn current_admin_mode(&self, session_id: &str) -> GateResult<Option<AdminModeSession>> {
        let now = self.ctx.clock.now();
        let session = load_session(&self.ctx, session_id, now)?;
        if admin_mode_active(&session, now) {
            Ok(session.admin_mode)
        } else {
            Ok(None)
        }
    }

    /// Leave admin mode. Returns whether it was on.
    pub fn disable_admin_mode(&self, session_id: &str) -> GateResult<bool> {
        let now = self.ctx.clock.now();
        let mut session = load_session(&self.ctx, session_id, now)?;

        let was_active = admin_mode_active(&session, now);
        let had_state = session.admin_mode.take().is_some()
            | self
                .challenges
                .clear(&mut session, ChallengePurpose::AdminModeStepUp);
        session.admin_mode_return_to = None;
        if had_state {
            self.ctx.sessions.save(session)?;
        }

        if was_active {
            info!(session_id = %session_id, "Admin mode disabled");
        }
        Ok(was_active)
    }

    async fn eligible_admin(&self, session: &Session) -> GateResult<User> {
        if !self.ctx.config.admin_mode.enabled {
            return Err(GateError::policy("Admin mode is disabled"));
        }
        let Some(user_id) = session.user_id else {
            return Err(GateError::policy("You need to sign in first"));
        };
        let user = self
            .ctx
            .users
            .find(user_id)
            .await?
            .ok_or(GateError::StaleChallenge)?;

        if !user.admin {
            return Err(GateError::policy("Admin mode is only available to administrators"));
        }
        // A login lockout does not block step-up, an inactive account does
        if !user.status.is_active() || !user.is_confirmed() {
            return Err(GateError::policy("Your account is not active"));
        }
        Ok(user)
    }
}
