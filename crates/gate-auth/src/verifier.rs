//! Credential Verifier
//!
//! Stateless checks of a presented credential against what is stored for the
//! user: password, time-based one-time code, and WebAuthn assertion. Nothing
//! in here touches storage or the session.

use std::sync::Arc;

use base64::engine::general_purpose;
use base64::Engine;
use chrono::{DateTime, Utc};
use gate_core::config::{TwoFactorConfig, WebAuthnConfig};
use gate_models::{User, WebAuthnRegistration};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Decode base64url, tolerating padding and the standard alphabet
pub(crate) fn decode_b64_mixed(input: &str) -> Option<Vec<u8>> {
    let trimmed = input.trim_end_matches('=');
    general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| general_purpose::STANDARD.decode(input))
        .ok()
}

/// Checks a candidate password against the stored hash
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, candidate: &str, stored_hash: &str) -> bool;
}

/// Argon2 PHC-string verifier
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2PasswordVerifier;

impl Argon2PasswordVerifier {
    /// Hash a password into a PHC string (used for seeding users)
    pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
        use argon2::{
            password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
            Argon2,
        };
        let salt = SaltString::generate(&mut OsRng);
        Ok(Argon2::default()
            .hash_password(password.as_bytes(), &salt)?
            .to_string())
    }
}

impl PasswordVerifier for Argon2PasswordVerifier {
    fn verify(&self, candidate: &str, stored_hash: &str) -> bool {
        use argon2::{
            password_hash::{PasswordHash, PasswordVerifier as _},
            Argon2,
        };
        match PasswordHash::new(stored_hash) {
            Ok(parsed_hash) => Argon2::default()
                .verify_password(candidate.as_bytes(), &parsed_hash)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// RFC 6238 one-time codes
#[derive(Debug, Clone)]
pub struct TotpVerifier {
    digits: usize,
    skew: u8,
    step: u64,
}

impl TotpVerifier {
    pub fn new(config: &TwoFactorConfig) -> Self {
        Self {
            digits: config.otp_digits,
            skew: config.otp_allowed_drift_steps,
            step: config.otp_period_seconds,
        }
    }

    fn totp(&self, secret: &str) -> Option<TOTP> {
        let bytes = Secret::Encoded(secret.to_string()).to_bytes().ok()?;
        TOTP::new(Algorithm::SHA1, self.digits, self.skew, self.step, bytes).ok()
    }

    /// Accepts the code for the current step and `skew` steps either side
    pub fn verify(&self, secret: &str, code: &str, now: DateTime<Utc>) -> bool {
        let code = code.trim();
        if code.len() != self.digits || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        let Ok(time) = u64::try_from(now.timestamp()) else {
            return false;
        };
        match self.totp(secret) {
            Some(totp) => totp.check(code, time),
            None => {
                tracing::warn!("Stored OTP secret could not be decoded");
                false
            }
        }
    }

    /// Current code for a secret
    pub fn generate(&self, secret: &str, now: DateTime<Utc>) -> Option<String> {
        let time = u64::try_from(now.timestamp()).ok()?;
        self.totp(secret).map(|totp| totp.generate(time))
    }
}

/// Browser response to `navigator.credentials.get()`
#[derive(Debug, Clone, Deserialize)]
pub struct AssertionResponse {
    pub id: String,
    #[serde(rename = "rawId", default)]
    pub raw_id: Option<String>,
    pub response: AuthenticatorAssertion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatorAssertion {
    #[serde(rename = "clientDataJSON", alias = "clientDataJson")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    pub signature: String,
}

impl AssertionResponse {
    pub fn parse(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }

    pub fn credential_id(&self) -> &str {
        self.raw_id.as_deref().unwrap_or(&self.id)
    }

    /// Credential ids compare by their decoded bytes, so padding or
    /// alphabet differences do not matter
    pub fn matches(&self, registration: &WebAuthnRegistration) -> bool {
        match (
            decode_b64_mixed(self.credential_id()),
            decode_b64_mixed(&registration.credential_id),
        ) {
            (Some(presented), Some(stored)) => constant_time_eq(&presented, &stored),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
    origin: String,
}

/// Why an assertion was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Malformed,
    UnknownCredential,
    NoOutstandingChallenge,
    WrongType,
    ChallengeMismatch,
    OriginMismatch,
    RpIdMismatch,
    UserNotPresent,
    BadSignature,
    /// Valid signature, but the counter did not advance
    CounterRegression { stored: u32, presented: u32 },
    /// Another request advanced the counter first
    Replayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionOutcome {
    Verified { new_counter: u32 },
    Rejected(RejectReason),
}

impl AssertionOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, AssertionOutcome::Verified { .. })
    }
}

/// ES256 assertion verification
#[derive(Debug, Clone)]
pub struct WebAuthnVerifier {
    rp_id: String,
    origin: String,
}

const FLAG_USER_PRESENT: u8 = 0x01;

impl WebAuthnVerifier {
    pub fn new(config: &WebAuthnConfig) -> Self {
        Self {
            rp_id: config.rp_id.clone(),
            origin: config.origin.clone(),
        }
    }

    pub fn verify(
        &self,
        registration: &WebAuthnRegistration,
        assertion: &AssertionResponse,
        expected_challenge: &str,
    ) -> AssertionOutcome {
        use AssertionOutcome::Rejected;

        if !assertion.matches(registration) {
            return Rejected(RejectReason::UnknownCredential);
        }

        let Some(client_data_raw) = decode_b64_mixed(&assertion.response.client_data_json) else {
            return Rejected(RejectReason::Malformed);
        };
        let Ok(client_data) = serde_json::from_slice::<ClientData>(&client_data_raw) else {
            return Rejected(RejectReason::Malformed);
        };

        if client_data.kind != "webauthn.get" {
            return Rejected(RejectReason::WrongType);
        }

        match (
            decode_b64_mixed(&client_data.challenge),
            decode_b64_mixed(expected_challenge),
        ) {
            (Some(presented), Some(expected)) if constant_time_eq(&presented, &expected) => {}
            _ => return Rejected(RejectReason::ChallengeMismatch),
        }

        if client_data.origin != self.origin {
            return Rejected(RejectReason::OriginMismatch);
        }

        let Some(authenticator_data) = decode_b64_mixed(&assertion.response.authenticator_data)
        else {
            return Rejected(RejectReason::Malformed);
        };
        if authenticator_data.len() < 37 {
            return Rejected(RejectReason::Malformed);
        }

        let rp_id_hash = Sha256::digest(self.rp_id.as_bytes());
        if !constant_time_eq(&authenticator_data[0..32], rp_id_hash.as_slice()) {
            return Rejected(RejectReason::RpIdMismatch);
        }

        if authenticator_data[32] & FLAG_USER_PRESENT == 0 {
            return Rejected(RejectReason::UserNotPresent);
        }

        if !self.signature_valid(registration, assertion, &authenticator_data, &client_data_raw) {
            return Rejected(RejectReason::BadSignature);
        }

        let presented = u32::from_be_bytes([
            authenticator_data[33],
            authenticator_data[34],
            authenticator_data[35],
            authenticator_data[36],
        ]);
        if presented <= registration.counter {
            return Rejected(RejectReason::CounterRegression {
                stored: registration.counter,
                presented,
            });
        }

        AssertionOutcome::Verified {
            new_counter: presented,
        }
    }

    fn signature_valid(
        &self,
        registration: &WebAuthnRegistration,
        assertion: &AssertionResponse,
        authenticator_data: &[u8],
        client_data_raw: &[u8],
    ) -> bool {
        let Some(signature) = decode_b64_mixed(&assertion.response.signature) else {
            return false;
        };
        let Some(public_key) = decode_b64_mixed(&registration.public_key) else {
            return false;
        };
        let Ok(signature) =
            Signature::from_der(&signature).or_else(|_| Signature::from_slice(&signature))
        else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&public_key) else {
            return false;
        };

        let client_data_hash = Sha256::digest(client_data_raw);
        let mut signed_data = Vec::with_capacity(authenticator_data.len() + client_data_hash.len());
        signed_data.extend_from_slice(authenticator_data);
        signed_data.extend_from_slice(&client_data_hash);

        verifying_key.verify(&signed_data, &signature).is_ok()
    }
}

/// The three checks bundled for the authenticators
#[derive(Clone)]
pub struct CredentialVerifier {
    password: Arc<dyn PasswordVerifier>,
    totp: TotpVerifier,
    webauthn: WebAuthnVerifier,
}

impl CredentialVerifier {
    pub fn new(
        password: Arc<dyn PasswordVerifier>,
        two_factor: &TwoFactorConfig,
        webauthn: &WebAuthnConfig,
    ) -> Self {
        Self {
            password,
            totp: TotpVerifier::new(two_factor),
            webauthn: WebAuthnVerifier::new(webauthn),
        }
    }

    pub fn verify_password(&self, user: &User, candidate: &str) -> bool {
        self.password.verify(candidate, &user.encrypted_password)
    }

    /// Never true for a user without an active OTP secret
    pub fn verify_otp(&self, user: &User, code: &str, now: DateTime<Utc>) -> bool {
        if !user.otp_active() {
            return false;
        }
        match user.otp_secret.as_deref() {
            Some(secret) => self.totp.verify(secret, code, now),
            None => false,
        }
    }

    pub fn verify_webauthn_assertion(
        &self,
        registration: &WebAuthnRegistration,
        assertion: &AssertionResponse,
        expected_challenge: &str,
    ) -> AssertionOutcome {
        self.webauthn.verify(registration, assertion, expected_challenge)
    }

    pub fn totp(&self) -> &TotpVerifier {
        &self.totp
    }
}
