//! # Services
//!
//! The operations callers invoke. Each one checks the actor's capability,
//! validates input, then runs one `BEGIN IMMEDIATE` transaction under the
//! lock retry policy.
//!
//! ## Components
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          FiscalEngine                                   │
//! │                                                                         │
//! │  sale.rs            create / add / remove / update / customer / get    │
//! │  finalize.rs        finalize (the 11-step transaction)                 │
//! │  reversal.rs        cancel, credit / debit notes                       │
//! │  sequence_admin.rs  create / activate / deactivate / extend / status   │
//! │  stock.rs           StockLedger + manual adjustment                    │
//! │       │                                                                 │
//! │       ├── allocator.rs  SequenceAllocator (inside the caller's tx)     │
//! │       └── TaxEngine     (fiscal-core, pure)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tracing
//! Every operation runs in an `info_span!("fiscal_op")` carrying
//! `correlation_id`, `actor`, `role` and the resource id. Failures are
//! logged once in that span: `warn!` for expected classes, `error!` for
//! `Unexpected`.

use std::future::Future;

use tracing::{error, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{FiscalConfig, FiscalSettings, LockRetry};
use crate::error::{ServiceError, ServiceResult};
use crate::pool::Database;
use fiscal_core::{Actor, ErrorKind, TaxEngine};

pub mod allocator;
pub mod finalize;
pub mod reversal;
pub mod sale;
pub mod sequence_admin;
pub mod stock;

// =============================================================================
// Engine
// =============================================================================

/// Entry point for every fiscal operation.
///
/// ## Usage
/// ```rust,ignore
/// let config = FiscalConfig::load(None)?;
/// let engine = FiscalEngine::open(&config).await?;
///
/// let sale = engine.create_sale(&cashier, Some("mesa-4")).await?;
/// engine.add_item(&cashier, &sale.id, "p-presidente", 2).await?;
/// let receipt = engine.finalize(&cashier, FinalizeRequest::cash(&sale.id, 50000)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct FiscalEngine {
    db: Database,
    retry: LockRetry,
    settings: FiscalSettings,
    tax: TaxEngine,
}

impl FiscalEngine {
    /// Wraps an open database with the given configuration.
    pub fn new(db: Database, config: &FiscalConfig) -> Self {
        FiscalEngine {
            db,
            retry: config.lock_retry(),
            settings: config.fiscal.clone(),
            tax: TaxEngine::default(),
        }
    }

    /// Opens the database described by the configuration (running
    /// migrations) and wraps it.
    pub async fn open(config: &FiscalConfig) -> ServiceResult<Self> {
        let db = Database::new(config.db_config()).await?;
        Ok(Self::new(db, config))
    }

    /// The underlying database (repositories, audit queries).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The tax engine used for running totals, finalize and notes.
    pub fn tax_engine(&self) -> &TaxEngine {
        &self.tax
    }

    /// Fiscal settings taken from the loaded configuration.
    pub fn settings(&self) -> &FiscalSettings {
        &self.settings
    }
}

// =============================================================================
// Tracing helpers
// =============================================================================

/// Span for one operation.
pub(crate) fn op_span(operation: &'static str, actor: &Actor, resource: &str) -> Span {
    info_span!(
        "fiscal_op",
        operation,
        correlation_id = %Uuid::new_v4(),
        actor = %actor.user_id,
        role = ?actor.role,
        resource = %resource,
    )
}

/// Runs `fut` inside `span`, logging a failure once.
pub(crate) async fn traced<T, Fut>(span: Span, fut: Fut) -> ServiceResult<T>
where
    Fut: Future<Output = ServiceResult<T>>,
{
    async move {
        let result = fut.await;
        if let Err(err) = &result {
            log_failure(err);
        }
        result
    }
    .instrument(span)
    .await
}

fn log_failure(err: &ServiceError) {
    match err.kind() {
        ErrorKind::Unexpected => error!(error = %err, "Operation failed unexpectedly"),
        kind => warn!(?kind, error = %err, "Operation rejected"),
    }
}

/// Fresh identifier for a new row.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Test support
// =============================================================================
