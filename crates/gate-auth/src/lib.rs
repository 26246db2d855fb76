//! # gate-auth
//!
//! Second-factor and admin-mode step-up authentication for Gate.
//!
//! ## Features
//!
//! - Password, TOTP and WebAuthn (ES256) credential verification
//! - Login flow with second-factor challenges bound to the password hash
//! - Per-user failure counting and time-based lockout
//! - Two-factor enforcement with grace periods
//! - Admin-mode step-up with its own challenge and failure counter
//! - Integration token (HS256 + query string hash) verification

pub mod admin_mode;
pub mod challenge;
pub mod context;
pub mod integration_token;
pub mod lockout;
pub mod login;
pub mod policy;
pub mod random;
pub mod requests;
pub mod session;
pub mod verifier;
pub mod webauthn;

#[cfg(test)]
mod testing;

pub use admin_mode::{admin_mode_active, AdminModeAuthenticator, AdminModeSession};
pub use challenge::{ChallengePurpose, ChallengeState, ChallengeStore, ChallengeValidity};
pub use context::AuthContext;
pub use integration_token::{IntegrationClaims, IntegrationTokenError, IntegrationTokenVerifier};
pub use lockout::LockoutTracker;
pub use login::LoginAuthenticator;
pub use policy::{TwoFactorPolicy, TwoFactorReason};
pub use random::OsRandom;
pub use requests::{
    ChallengePrompt, LoginState, PrimaryCredential, SecondFactorAttempt, StepUpAttempt, StepUpState,
};
pub use session::{CookieConfig, MemorySessionStore, Session, SessionError, SessionStore};
pub use verifier::{
    constant_time_eq, Argon2PasswordVerifier, CredentialVerifier, PasswordVerifier, RejectReason,
    TotpVerifier, WebAuthnVerifier,
};
pub use webauthn::{AssertionRequest, WebAuthnCoordinator, WebAuthnVerification};
