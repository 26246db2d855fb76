//! Challenge State Store
//!
//! A challenge is the short-lived record of "this user passed the password
//! step and now owes us a second factor". It lives inside the session, one
//! slot per purpose, and is bound to the password hash that was current when
//! it was issued.

use chrono::{DateTime, Duration, Utc};
use gate_core::traits::Id;
use gate_models::User;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::session::Session;
use crate::verifier::constant_time_eq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Login,
    AdminModeStepUp,
}

impl ChallengePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengePurpose::Login => "login",
            ChallengePurpose::AdminModeStepUp => "admin_mode_step_up",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeState {
    pub id: Uuid,
    pub subject_user_id: Id,
    /// Hex SHA-256 of the stored password hash at issue time
    pub password_hash_snapshot: String,
    /// Outstanding WebAuthn nonce, base64url
    pub webauthn_challenge: Option<String>,
    pub created_at: DateTime<Utc>,
    pub purpose: ChallengePurpose,
    pub failed_attempts: i32,
    pub remember_me: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeValidity {
    Valid,
    /// Password changed or the subject differs
    Stale,
    Expired,
}

impl ChallengeValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChallengeValidity::Valid)
    }
}

/// Fingerprint of a stored password hash. The hash itself never goes into
/// the session.
pub fn password_fingerprint(encrypted_password: &str) -> String {
    hex::encode(Sha256::digest(encrypted_password.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct ChallengeStore {
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Start a challenge for `user`, snapshotting the current password hash
    pub fn begin(&self, purpose: ChallengePurpose, user: &User, now: DateTime<Utc>) -> ChallengeState {
        ChallengeState {
            id: Uuid::new_v4(),
            subject_user_id: user.id,
            password_hash_snapshot: password_fingerprint(&user.encrypted_password),
            webauthn_challenge: None,
            created_at: now,
            purpose,
            failed_attempts: 0,
            remember_me: false,
        }
    }

    /// Replaces any outstanding nonce
    pub fn attach_webauthn_challenge(&self, state: &mut ChallengeState, challenge: String) {
        state.webauthn_challenge = Some(challenge);
    }

    pub fn validate(&self, state: &ChallengeState, user: &User, now: DateTime<Utc>) -> ChallengeValidity {
        if state.subject_user_id != user.id {
            return ChallengeValidity::Stale;
        }
        let current = password_fingerprint(&user.encrypted_password);
        if !constant_time_eq(current.as_bytes(), state.password_hash_snapshot.as_bytes()) {
            return ChallengeValidity::Stale;
        }
        if now >= state.created_at + self.ttl {
            return ChallengeValidity::Expired;
        }
        ChallengeValidity::Valid
    }

    pub fn get<'a>(&self, session: &'a Session, purpose: ChallengePurpose) -> Option<&'a ChallengeState> {
        slot(session, purpose).as_ref()
    }

    /// Put `state` into the slot for its purpose, replacing what was there
    pub fn install(&self, session: &mut Session, state: ChallengeState) {
        let purpose = state.purpose;
        *slot_mut(session, purpose) = Some(state);
    }

    /// Remove the challenge for `purpose`. Returns whether one was present.
    pub fn clear(&self, session: &mut Session, purpose: ChallengePurpose) -> bool {
        slot_mut(session, purpose).take().is_some()
    }
}

fn slot(session: &Session, purpose: ChallengePurpose) -> &Option<ChallengeState> {
    match purpose {
        ChallengePurpose::Login => &session.login_challenge,
        ChallengePurpose::AdminModeStepUp => &session.step_up_challenge,
    }
}

fn slot_mut(session: &mut Session, purpose: ChallengePurpose) -> &mut Option<ChallengeState> {
    match purpose {
        ChallengePurpose::Login => &mut session.login_challenge,
        ChallengePurpose::AdminModeStepUp => &mut session.step_up_challenge,
    }
}
