//! # fiscal-db: Storage and Services for the Fiscal Engine
//!
//! Owns the SQLite database and every write transaction. The services here
//! compose fiscal-core's pure logic with storage so that a sale, its stock
//! movements and its fiscal number always change together or not at all.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fiscal POS Data Flow                             │
//! │                                                                         │
//! │  Caller (POS front end, with an authenticated Actor)                    │
//! │       │  engine.finalize(&actor, FinalizeRequest::cash(id, 50000))      │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    fiscal-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   services    │    │  repository   │    │     pool     │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ FiscalEngine  │───►│ SaleRepo      │───►│ SqlitePool   │  │   │
//! │  │   │ Allocator     │    │ SequenceRepo  │    │ BEGIN        │  │   │
//! │  │   │ StockLedger   │    │ AuditTrail    │    │  IMMEDIATE   │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │ retry.rs: backoff on "database is locked"           │   │
//! │  └───────────┼─────────────────────────────────────────────────────┘   │
//! │              ▼                                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  │   sales · ncf_sequences · ncf_ledger · cancelled_ncfs · ...     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - `FiscalConfig` loading (defaults, TOML, environment)
//! - [`pool`] - Connection pool and `BEGIN IMMEDIATE` transactions
//! - [`migrations`] - Embedded database migrations
//! - [`retry`] - Bounded retry of whole transactions on lock contention
//! - [`error`] - `DbError` and `ServiceError`
//! - [`repository`] - Table access (reads on the pool, writes on a transaction)
//! - [`services`] - `FiscalEngine`: sale editing, finalize, reversal,
//!   sequence administration, stock
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fiscal_db::{FiscalConfig, FiscalEngine, FinalizeRequest};
//!
//! let config = FiscalConfig::load(None)?;
//! let engine = FiscalEngine::open(&config).await?;
//!
//! let sale = engine.create_sale(&actor, None).await?;
//! engine.add_item(&actor, &sale.id, "p-presidente", 2).await?;
//! let receipt = engine.finalize(&actor, FinalizeRequest::cash(&sale.id, 50000)).await?;
//! println!("{}", receipt.ncf);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;
pub mod services;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, FiscalConfig, FiscalSettings, LockRetry};
pub use error::{DbError, DbResult, ServiceError, ServiceResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::audit::AuditTrail;
pub use repository::cash::CashRepository;
pub use repository::note::NoteRepository;
pub use repository::product::ProductRepository;
pub use repository::sale::SaleRepository;
pub use repository::sequence::SequenceRepository;

// Service entry points and request types
pub use services::allocator::SequenceAllocator;
pub use services::finalize::FinalizeRequest;
pub use services::reversal::{NoteDetails, NoteLine, NoteRequest};
pub use services::sale::SaleDetails;
pub use services::sequence_admin::{NewSequence, SequenceStatus};
pub use services::stock::{StockLedger, StockMove};
pub use services::FiscalEngine;
