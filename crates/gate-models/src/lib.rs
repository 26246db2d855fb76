//! # gate-models
//!
//! Domain models for Gate.
//!
//! Users and their WebAuthn registrations are created by flows outside this
//! workspace; here they are read, and only the lockout fields and signature
//! counters are ever written back (through [`UserStore`]).

pub use gate_core::traits::{Id, Identifiable, Timestamped};

pub mod store;
pub mod user;

pub use store::{LockoutOutcome, MemoryUserStore, UserStore};
pub use user::model::User;
pub use user::webauthn::WebAuthnRegistration;
