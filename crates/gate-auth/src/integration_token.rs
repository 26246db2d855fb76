//! Integration token verification
//!
//! Third-party app integrations sign requests with an HS256 token whose
//! `qsh` claim binds it to one method, path and query string.

use std::collections::BTreeMap;

use gate_core::GateError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::verifier::constant_time_eq;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationClaims {
    /// Client key of the integration
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Query string hash
    pub qsh: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrationTokenError {
    #[error("Token is expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Query string hash does not match the request")]
    QueryHashMismatch,
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),
}

impl From<IntegrationTokenError> for GateError {
    fn from(err: IntegrationTokenError) -> Self {
        match err {
            IntegrationTokenError::EncodingFailed(message) => GateError::Config(message),
            _ => GateError::InvalidCredential,
        }
    }
}

pub struct IntegrationTokenVerifier {
    client_key: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl IntegrationTokenVerifier {
    pub fn new(client_key: impl Into<String>, shared_secret: &[u8]) -> Self {
        Self {
            client_key: client_key.into(),
            encoding_key: EncodingKey::from_secret(shared_secret),
            decoding_key: DecodingKey::from_secret(shared_secret),
        }
    }

    /// Sign a token for one request, valid for `expires_in_seconds`
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        issued_at: i64,
        expires_in_seconds: i64,
    ) -> Result<String, IntegrationTokenError> {
        let claims = IntegrationClaims {
            iss: self.client_key.clone(),
            iat: issued_at,
            exp: issued_at + expires_in_seconds,
            qsh: query_string_hash(method, path, query),
            sub: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IntegrationTokenError::EncodingFailed(e.to_string()))
    }

    /// Check signature, issuer and expiry, then that the token was minted
    /// for exactly this request
    pub fn verify(
        &self,
        token: &str,
        method: &str,
        path: &str,
        query: &str,
    ) -> Result<IntegrationClaims, IntegrationTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.client_key.clone()]);
        validation.validate_aud = false;

        let claims = decode::<IntegrationClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => IntegrationTokenError::Expired,
                _ => IntegrationTokenError::Invalid(e.to_string()),
            })?
            .claims;

        let expected = query_string_hash(method, path, query);
        if !constant_time_eq(expected.as_bytes(), claims.qsh.as_bytes()) {
            tracing::debug!(issuer = %claims.iss, "Integration token qsh mismatch");
            return Err(IntegrationTokenError::QueryHashMismatch);
        }
        Ok(claims)
    }
}

/// `METHOD&path&query` with the query sorted by key, repeated keys joined
/// by commas and the `jwt` parameter dropped
pub fn canonical_request(method: &str, path: &str, query: &str) -> String {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    let mut params: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for pair in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "jwt" {
            continue;
        }
        params.entry(key).or_default().push(value);
    }

    let query = params
        .into_iter()
        .map(|(key, mut values)| {
            values.sort_unstable();
            format!("{}={}", key, values.join(","))
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{}&{}&{}", method.to_uppercase(), path, query)
}

pub fn query_string_hash(method: &str, path: &str, query: &str) -> String {
    hex::encode(Sha256::digest(canonical_request(method, path, query).as_bytes()))
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(authorization: &str) -> Option<&str> {
    match authorization.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => Some(authorization[7..].trim()),
        _ => None,
    }
}
