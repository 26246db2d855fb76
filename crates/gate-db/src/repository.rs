//! Repository errors

use gate_core::GateError;

/// Error type for repository operations
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Storage failures never authenticate anyone; they surface as a retryable
/// transport error.
impl From<RepositoryError> for GateError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(value) => GateError::NotFound {
                entity: "User",
                field: "id",
                value,
            },
            other => GateError::transport("database", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_are_retryable() {
        let err: GateError = RepositoryError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);

        let err: GateError = RepositoryError::NotFound("4".to_string()).into();
        assert_eq!(err.status_code(), 404);
    }
}
