//! Result type aliases

use crate::error::GateError;

/// Standard Result type for Gate operations
pub type GateResult<T> = Result<T, GateError>;
