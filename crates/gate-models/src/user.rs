//! User model and its registered authenticators

pub mod model;
pub mod webauthn;

pub use model::*;
pub use webauthn::*;
