//! WebAuthn Challenge Coordinator
//!
//! Issues assertion requests with a fresh server nonce and checks the
//! browser's answer against the nonce held in the challenge state.

use std::sync::Arc;

use base64::engine::general_purpose;
use base64::Engine;
use gate_core::config::WebAuthnConfig;
use gate_core::traits::{Id, RandomSource};
use gate_core::GateResult;
use gate_models::{User, UserStore, WebAuthnRegistration};
use serde::{Deserialize, Serialize};

use crate::challenge::ChallengeState;
use crate::verifier::{AssertionOutcome, AssertionResponse, CredentialVerifier, RejectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    Preferred,
    #[default]
    Discouraged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionExtensions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,
}

impl AssertionExtensions {
    pub fn is_empty(&self) -> bool {
        self.appid.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowCredential {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub transports: Vec<String>,
}

/// `PublicKeyCredentialRequestOptions` as the browser expects them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionRequest {
    pub challenge: String,
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<AllowCredential>,
    pub user_verification: UserVerification,
    #[serde(skip_serializing_if = "AssertionExtensions::is_empty", default)]
    pub extensions: AssertionExtensions,
}

/// Result of checking a browser response against a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebAuthnVerification {
    Verified { registration_id: Id, new_counter: u32 },
    Rejected(RejectReason),
}

impl WebAuthnVerification {
    pub fn is_verified(&self) -> bool {
        matches!(self, WebAuthnVerification::Verified { .. })
    }
}

pub struct WebAuthnCoordinator {
    config: WebAuthnConfig,
    verifier: CredentialVerifier,
    users: Arc<dyn UserStore>,
    random: Arc<dyn RandomSource>,
}

impl WebAuthnCoordinator {
    pub fn new(
        config: WebAuthnConfig,
        verifier: CredentialVerifier,
        users: Arc<dyn UserStore>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            verifier,
            users,
            random,
        }
    }

    fn new_challenge(&self) -> String {
        let len = self.config.challenge_bytes.max(16);
        general_purpose::URL_SAFE_NO_PAD.encode(self.random.random_bytes(len))
    }

    /// `None` when there is nothing to ask for, so the caller can offer OTP
    /// only
    pub fn build_assertion_request(
        &self,
        registrations: &[WebAuthnRegistration],
        user_verification: UserVerification,
        extensions: AssertionExtensions,
    ) -> Option<AssertionRequest> {
        if !self.config.enabled || registrations.is_empty() {
            return None;
        }

        Some(AssertionRequest {
            challenge: self.new_challenge(),
            timeout: self.config.timeout_ms,
            rp_id: self.config.rp_id.clone(),
            allow_credentials: registrations
                .iter()
                .map(|r| AllowCredential {
                    kind: "public-key".to_string(),
                    id: r.credential_id.clone(),
                    transports: ["usb", "nfc", "ble", "internal"]
                        .iter()
                        .map(|t| t.to_string())
                        .collect(),
                })
                .collect(),
            user_verification,
            extensions,
        })
    }

    /// Request with the configured defaults
    pub fn request_for(&self, user: &User) -> Option<AssertionRequest> {
        self.build_assertion_request(
            &user.webauthn_registrations,
            UserVerification::Discouraged,
            AssertionExtensions {
                appid: self.config.app_id.clone(),
            },
        )
    }

    /// Issue a fresh nonce for `state` and return the matching request
    pub fn issue(&self, user: &User, state: &mut ChallengeState) -> Option<AssertionRequest> {
        let request = self.request_for(user);
        state.webauthn_challenge = request.as_ref().map(|r| r.challenge.clone());
        request
    }

    /// Check `response_json` against the nonce in `state` and advance the
    /// stored counter. The nonce is consumed on success.
    pub async fn verify_assertion(
        &self,
        user: &User,
        state: &mut ChallengeState,
        response_json: &str,
    ) -> GateResult<WebAuthnVerification> {
        use WebAuthnVerification::Rejected;

        let Some(expected) = state.webauthn_challenge.clone() else {
            return Ok(Rejected(RejectReason::NoOutstandingChallenge));
        };
        let Some(assertion) = AssertionResponse::parse(response_json) else {
            return Ok(Rejected(RejectReason::Malformed));
        };
        let Some(registration) = user
            .webauthn_registrations
            .iter()
            .find(|r| assertion.matches(r))
        else {
            return Ok(Rejected(RejectReason::UnknownCredential));
        };

        let new_counter = match self
            .verifier
            .verify_webauthn_assertion(registration, &assertion, &expected)
        {
            AssertionOutcome::Verified { new_counter } => new_counter,
            AssertionOutcome::Rejected(reason) => return Ok(Rejected(reason)),
        };

        let advanced = self
            .users
            .advance_webauthn_counter(registration.id, registration.counter, new_counter)
            .await?;
        if !advanced {
            return Ok(Rejected(RejectReason::Replayed));
        }

        state.webauthn_challenge = None;
        Ok(WebAuthnVerification::Verified {
            registration_id: registration.id,
            new_counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{ChallengePurpose, ChallengeStore};
    use crate::random::OsRandom;
    use crate::verifier::test_support::*;
    use crate::verifier::PasswordVerifier;
    use chrono::{Duration, Utc};
    use gate_core::config::TwoFactorConfig;
    use gate_models::MemoryUserStore;

    struct NoPasswords;

    impl PasswordVerifier for NoPasswords {
        fn verify(&self, _: &str, _: &str) -> bool {
            false
        }
    }

    fn coordinator(users: Arc<MemoryUserStore>, config: WebAuthnConfig) -> WebAuthnCoordinator {
        let verifier = CredentialVerifier::new(
            Arc::new(NoPasswords),
            &TwoFactorConfig::default(),
            &config,
        );
        WebAuthnCoordinator::new(config, verifier, users, Arc::new(OsRandom))
    }

    fn setup() -> (Arc<MemoryUserStore>, SoftKey, User) {
        let key = SoftKey::new(0x11);
        let mut user = User::new(1, "alice", "alice@example.com", "hash");
        user.webauthn_registrations.push(key.registration(10, 1, 3));
        let users = Arc::new(MemoryUserStore::with_users([user.clone()]));
        (users, key, user)
    }

    fn state(user: &User) -> ChallengeState {
        ChallengeStore::new(Duration::minutes(15)).begin(ChallengePurpose::Login, user, Utc::now())
    }

    #[test]
    fn test_no_registrations_means_no_request() {
        let (users, _, mut user) = setup();
        let coordinator = coordinator(users, webauthn_config());
        user.webauthn_registrations.clear();
        assert!(coordinator.request_for(&user).is_none());

        let mut state = state(&user);
        assert!(coordinator.issue(&user, &mut state).is_none());
        assert!(state.webauthn_challenge.is_none());
    }

    #[test]
    fn test_request_shape() {
        let (users, key, user) = setup();
        let config = WebAuthnConfig {
            app_id: Some("https://gate.example.com/app-id.json".to_string()),
            ..webauthn_config()
        };
        let request = coordinator(users, config).request_for(&user).unwrap();

        let raw = general_purpose::URL_SAFE_NO_PAD.decode(&request.challenge).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(request.allow_credentials[0].id, key.credential_id);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["userVerification"], "discouraged");
        assert_eq!(json["rpId"], RP_ID);
        assert_eq!(json["allowCredentials"][0]["type"], "public-key");
        assert_eq!(json["extensions"]["appid"], "https://gate.example.com/app-id.json");
    }

    #[test]
    fn test_challenges_are_unique() {
        let (users, _, user) = setup();
        let coordinator = coordinator(users, webauthn_config());
        let a = coordinator.request_for(&user).unwrap();
        let b = coordinator.request_for(&user).unwrap();
        assert_ne!(a.challenge, b.challenge);
        assert!(serde_json::to_value(&a).unwrap().get("extensions").is_none());
    }

    #[tokio::test]
    async fn test_verify_consumes_nonce_and_advances_counter() {
        let (users, key, user) = setup();
        let coordinator = coordinator(users.clone(), webauthn_config());
        let mut state = state(&user);
        let request = coordinator.issue(&user, &mut state).unwrap();

        let result = coordinator
            .verify_assertion(&user, &mut state, &key.assert(&request.challenge, 4))
            .await
            .unwrap();
        assert_eq!(
            result,
            WebAuthnVerification::Verified {
                registration_id: 10,
                new_counter: 4
            }
        );
        assert!(state.webauthn_challenge.is_none());
        assert_eq!(users.get(1).unwrap().webauthn_registrations[0].counter, 4);
    }

    #[tokio::test]
    async fn test_lost_counter_race_is_a_replay() {
        let (users, key, user) = setup();
        let coordinator = coordinator(users.clone(), webauthn_config());
        let mut state = state(&user);
        let request = coordinator.issue(&user, &mut state).unwrap();

        // A concurrent request already moved the counter past our snapshot
        users.advance_webauthn_counter(10, 3, 4).await.unwrap();

        let result = coordinator
            .verify_assertion(&user, &mut state, &key.assert(&request.challenge, 4))
            .await
            .unwrap();
        assert_eq!(result, WebAuthnVerification::Rejected(RejectReason::Replayed));
        assert!(state.webauthn_challenge.is_some());
    }

    #[tokio::test]
    async fn test_without_outstanding_nonce() {
        let (users, key, user) = setup();
        let coordinator = coordinator(users, webauthn_config());
        let mut state = state(&user);

        let result = coordinator
            .verify_assertion(&user, &mut state, &key.assert("anything", 4))
            .await
            .unwrap();
        assert_eq!(
            result,
            WebAuthnVerification::Rejected(RejectReason::NoOutstandingChallenge)
        );

        coordinator.issue(&user, &mut state);
        let result = coordinator
            .verify_assertion(&user, &mut state, "{not json")
            .await
            .unwrap();
        assert_eq!(result, WebAuthnVerification::Rejected(RejectReason::Malformed));
    }
}
