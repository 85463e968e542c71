//! # Error Types
//!
//! Domain-specific error types for fiscal-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fiscal-core errors (this file)                                        │
//! │  ├── CoreError        - Domain rule failures                           │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── ErrorKind        - Taxonomy every error is classified into        │
//! │                                                                         │
//! │  fiscal-db errors (separate crate)                                     │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── ServiceError     - CoreError | DbError | LockTimeout              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → ServiceError → caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure rolls back the enclosing transaction, so no variant ever
//! describes a half-applied change.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::ncf::NcfType;
use crate::permission::{Capability, Role};
use crate::types::SaleStatus;

// =============================================================================
// Error Kind
// =============================================================================

/// Classification of every engine failure.
///
/// Callers branch on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or out-of-range input.
    Validation,
    /// Operation not allowed from the entity's current state.
    StateConflict,
    /// A business resource ran out (stock, sequence numbers, cash session).
    BusinessRule,
    /// Sequence configuration is inconsistent (zero or several active).
    Configuration,
    /// The actor's role lacks the capability.
    Permission,
    /// Referenced entity does not exist.
    NotFound,
    /// Lost a race or timed out waiting for a lock. Safe to retry.
    Concurrency,
    /// Anything else. Logged with full context, reported generically.
    Unexpected,
}

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised by the finalize engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Sale is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Adding items to a completed sale
    /// - Cancelling an already cancelled sale
    /// - Finalizing a cancelled sale
    /// - Issuing a credit note against a pending sale
    #[error("Sale {sale_id} is {status:?}, cannot {operation}")]
    InvalidSaleStatus {
        sale_id: String,
        status: SaleStatus,
        operation: &'static str,
    },

    /// Finalize was requested on a sale with no items.
    #[error("Sale {0} has no items")]
    EmptySale(String),

    /// Not enough stock for a stock-tracked product.
    ///
    /// ## User Workflow
    /// ```text
    /// Finalize (2 × Presidente, 1 × Presidente merged → 3)
    ///      │
    ///      ▼
    /// Lock product row: stock=2
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Presidente", available: 2, required: 3 }
    ///      │
    ///      ▼
    /// Transaction rolled back, no NCF consumed
    /// ```
    #[error("Insufficient stock for {product}: available {available}, required {required}")]
    InsufficientStock {
        product_id: String,
        product: String,
        available: i64,
        required: i64,
    },

    /// No active sequence exists for the requested NCF type.
    #[error("No active NCF sequence for type {0}")]
    NoActiveSequence(NcfType),

    /// More than one sequence is active for the same type.
    ///
    /// ## When This Occurs
    /// Only when sequence rows were edited outside the admin operations,
    /// which refuse to activate a second sequence. Surfaced verbatim so an
    /// administrator can repair the configuration.
    #[error("{count} active NCF sequences for type {ncf_type}, expected exactly one")]
    MultipleActiveSequences { ncf_type: NcfType, count: usize },

    /// The active sequence has issued its last number.
    #[error("NCF sequence {serie} exhausted at {end_number}")]
    SequenceExhausted { serie: String, end_number: i64 },

    /// Cash payment without an open cash session on the sale's register.
    #[error("An open cash session is required for cash payments (register: {})", .register_id.as_deref().unwrap_or("none"))]
    SessionRequired { register_id: Option<String> },

    /// The actor's role does not grant the capability.
    #[error("Role {role:?} is not allowed to {capability:?}")]
    PermissionDenied { role: Role, capability: Capability },

    /// Cash received does not cover the sale total.
    #[error("Cash received {received} is less than total {total}")]
    InsufficientPayment { total: i64, received: i64 },

    /// Tax-credit and government NCFs identify the buyer.
    #[error("A valid customer RNC is required for NCF type {0}")]
    RncRequired(NcfType),

    /// Note quantity larger than what is still returnable on the line.
    #[error("Sale item {sale_item_id}: sold {sold}, already credited {already_credited}, requested {requested}")]
    QuantityExceedsSold {
        sale_item_id: String,
        sold: i64,
        already_credited: i64,
        requested: i64,
    },

    /// Another sequence of the same type is already active.
    #[error("NCF type {0} already has an active sequence")]
    ActiveSequenceExists(NcfType),

    /// Serie already used by another active sequence.
    #[error("Serie {0} is already used by an active sequence")]
    SerieInUse(String),

    /// Numeric range collides with another sequence of the same type.
    #[error("Range {start}-{end} overlaps sequence {other_serie} ({other_start}-{other_end})")]
    SequenceOverlap {
        start: i64,
        end: i64,
        other_serie: String,
        other_start: i64,
        other_end: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InvalidSaleStatus { .. }
            | CoreError::ActiveSequenceExists(_)
            | CoreError::SerieInUse(_)
            | CoreError::SequenceOverlap { .. } => ErrorKind::StateConflict,
            CoreError::EmptySale(_)
            | CoreError::InsufficientPayment { .. }
            | CoreError::RncRequired(_)
            | CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::InsufficientStock { .. }
            | CoreError::SequenceExhausted { .. }
            | CoreError::SessionRequired { .. }
            | CoreError::QuantityExceedsSold { .. } => ErrorKind::BusinessRule,
            CoreError::NoActiveSequence(_) | CoreError::MultipleActiveSequences { .. } => {
                ErrorKind::Configuration
            }
            CoreError::PermissionDenied { .. } => ErrorKind::Permission,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any lock is taken, so they never cost a transaction.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (serie, NCF, RNC).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
