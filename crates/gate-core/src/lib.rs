//! # gate-core
//!
//! Core types, traits, and utilities for Gate.
//!
//! This crate provides the foundational building blocks used across all other crates:
//! - The authentication error taxonomy
//! - Result type aliases
//! - Core traits (Identifiable, Timestamped, Clock, RandomSource)
//! - Configuration types

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::*;
pub use result::*;
pub use traits::*;
pub use types::*;
