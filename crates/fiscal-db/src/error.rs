//! # Database and Service Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError ← constraint / lock / trigger categorization                  │
//! │       │                                                                 │
//! │       │        CoreError (fiscal-core) ← business rule failures        │
//! │       │             │                                                   │
//! │       ▼             ▼                                                   │
//! │  ServiceError ── kind() ──► ErrorKind (Validation, Concurrency, ...)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller (transaction already rolled back)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use fiscal_core::{CoreError, ErrorKind};
use thiserror::Error;

// =============================================================================
// Database Error
// =============================================================================

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two transactions issuing the same (serie, number)
    /// - Two completed sales carrying the same NCF
    /// - Cancelling an NCF twice
    ///
    /// Under `BEGIN IMMEDIATE` these are unreachable through the services;
    /// if one fires it means another writer bypassed the lock.
    #[error("Duplicate {field}")]
    UniqueViolation { field: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint or trigger abort (append-only tables, counters).
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// SQLite reported the database locked past `busy_timeout`.
    #[error("Database is locked: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Serializing an audit snapshot failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True when retrying the whole transaction may succeed.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound      → DbError::NotFound
/// "UNIQUE constraint failed"    → DbError::UniqueViolation
/// "FOREIGN KEY constraint ..."  → DbError::ForeignKeyViolation
/// "CHECK constraint" / RAISE    → DbError::ConstraintViolation
/// "database is locked"/"busy"   → DbError::Busy
/// sqlx::Error::PoolTimedOut     → DbError::PoolExhausted
/// Other                         → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation { field }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed")
                    || msg.contains("append-only")
                    || msg.contains("ncf sequence")
                {
                    DbError::ConstraintViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("database is locked") || msg.contains("database is busy") {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Service Error
// =============================================================================

/// What the services return: a business rule failure, a storage failure, or
/// a lock wait that ran out of budget.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// The write lock could not be acquired within the retry budget.
    ///
    /// ## When This Occurs
    /// Many terminals finalizing at once on a slow disk. Retryable.
    #[error("Timed out after {waited:?} waiting for the write lock ({operation})")]
    LockTimeout {
        operation: &'static str,
        waited: Duration,
    },
}

impl ServiceError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Core(err) => err.kind(),
            ServiceError::Db(err) => match err {
                DbError::NotFound { .. } => ErrorKind::NotFound,
                DbError::UniqueViolation { .. } | DbError::Busy(_) | DbError::PoolExhausted => {
                    ErrorKind::Concurrency
                }
                _ => ErrorKind::Unexpected,
            },
            ServiceError::LockTimeout { .. } => ErrorKind::Concurrency,
        }
    }

    /// True for the concurrency class.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }

    /// Message safe to show a cashier. Unexpected failures are not detailed.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unexpected => "Unexpected error, the operation was not applied".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fiscal_core::NcfType;

    #[test]
    fn test_service_error_kinds() {
        let err: ServiceError = CoreError::NoActiveSequence(NcfType::FinalConsumer).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());

        let err: ServiceError = DbError::UniqueViolation {
            field: "ncf_ledger.serie, ncf_ledger.number".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Concurrency);
        assert!(err.is_retryable());

        let err: ServiceError = DbError::QueryFailed("syntax error".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(!err.public_message().contains("syntax"));

        let err = ServiceError::LockTimeout {
            operation: "finalize",
            waited: Duration::from_secs(5),
        };
        assert!(err.is_retryable());
    }
}
