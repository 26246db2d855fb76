//! Registered WebAuthn authenticators
//!
//! Table: webauthn_registrations

use chrono::{DateTime, Utc};
use gate_core::traits::{Id, Identifiable};
use serde::{Deserialize, Serialize};

/// A security key bound to a user
///
/// `credential_id` and `public_key` are base64url without padding, the
/// public key being an uncompressed SEC1 P-256 point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAuthnRegistration {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub credential_id: String,
    #[serde(skip_serializing)]
    pub public_key: String,
    /// Last accepted signature counter
    pub counter: u32,
    pub created_at: Option<DateTime<Utc>>,
}

impl WebAuthnRegistration {
    pub fn new(
        id: Id,
        user_id: Id,
        credential_id: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            user_id,
            name: String::new(),
            credential_id: credential_id.into(),
            public_key: public_key.into(),
            counter: 0,
            created_at: None,
        }
    }
}

impl Identifiable for WebAuthnRegistration {
    fn id(&self) -> Option<Id> {
        Some(self.id)
    }
}
