//! # gate-db
//!
//! Database layer for Gate.
//!
//! PostgreSQL access using SQLx:
//!
//! - Connection pool management
//! - [`PgUserStore`], the `UserStore` implementation whose lockout and
//!   signature-counter updates are single atomic statements or row-locked
//!   transactions
//!
//! ## Example
//!
//! ```ignore
//! use gate_db::{Database, DatabaseConfig, PgUserStore};
//!
//! let db = Database::connect(&DatabaseConfig::with_url(url)).await?;
//! let users = PgUserStore::new(db.pool().clone());
//! ```

pub mod pool;
pub mod repository;
pub mod users;

pub use pool::{Database, DatabaseConfig, PoolStats};
pub use repository::{RepositoryError, RepositoryResult};
pub use users::{status as user_status, PgUserStore, UserRow, WebAuthnRegistrationRow};
