//! # Repository Module
//!
//! Database repository implementations for the fiscal engine.
//!
//! ## Two Access Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Reads (receipt reprint, reports)                                      │
//! │       │  db.sales().get_by_id(id)                                      │
//! │       ▼                                                                 │
//! │  Repository { pool }  ── any pooled connection                         │
//! │                                                                         │
//! │  Writes (services)                                                     │
//! │       │  let mut tx = db.begin_immediate().await?;                     │
//! │       │  SaleRepository::fetch(&mut tx, id)                            │
//! │       │  SequenceRepository::advance(&mut tx, ...)                     │
//! │       │  AuditTrail::record_issued(&mut tx, ...)                       │
//! │       │  tx.commit()                                                   │
//! │       ▼                                                                 │
//! │  Associated fns taking &mut SqliteConnection ── the locked transaction │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Catalog read model and stock writes
//! - [`SaleRepository`](sale::SaleRepository) - Sales and sale items
//! - [`SequenceRepository`](sequence::SequenceRepository) - NCF sequences
//! - [`CashRepository`](cash::CashRepository) - Registers and sessions
//! - [`NoteRepository`](note::NoteRepository) - Credit/debit notes
//! - [`AuditTrail`](audit::AuditTrail) - Append-only ledger and adjustments

pub mod audit;
pub mod cash;
pub mod note;
pub mod product;
pub mod sale;
pub mod sequence;
