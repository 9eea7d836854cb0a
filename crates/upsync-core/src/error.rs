//! Error types module
//!
//! All errors are unified under the `AppError` enum. The split that matters
//! operationally is recoverable vs. terminal: only recoverable errors may be
//! retried at the queue-consumption layer, everything else is final for the
//! operation that produced it.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx`
//! feature, matching how downstream crates opt in to the Postgres backend.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    /// Object key collides with a live record. User-correctable at intake.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Notification payload that will never parse. Dead-letter, not retried.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Record store unavailable or lost a transient race. Retried with backoff.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Credential issuer error: {0}")]
    Issuer(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedEvent(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

impl AppError {
    /// Machine-readable error code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::MalformedEvent(_) => "MALFORMED_EVENT",
            AppError::TransientStore(_) => "TRANSIENT_STORE_ERROR",
            AppError::Issuer(_) => "ISSUER_ERROR",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation can succeed. Drives the
    /// ack/retry/dead-letter decision at the consumer.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::TransientStore(_) | AppError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_event_is_terminal() {
        let err = AppError::MalformedEvent("not json".to_string());
        assert_eq!(err.error_code(), "MALFORMED_EVENT");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn transient_store_is_recoverable() {
        let err = AppError::TransientStore("pool timeout".to_string());
        assert!(err.is_recoverable());
    }

    #[test]
    fn conflict_is_terminal() {
        let err = AppError::Conflict("uploads/42".to_string());
        assert_eq!(err.error_code(), "CONFLICT");
        assert!(!err.is_recoverable());
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn database_error_is_recoverable() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
    }
}
