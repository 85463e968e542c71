//! # fiscal-core: Pure Fiscal Logic for the POS
//!
//! Everything the sale finalization engine decides without touching storage:
//! money arithmetic, the tax/service-charge engine, NCF formatting, the role
//! model and input validation.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fiscal POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │       Collaborators (auth, receipt rendering, DGII export)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Actor + requests                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        fiscal-db services (SaleService, FinalizeService, ...)   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fiscal-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │    tax    │  │    ncf    │  │permission │  │   │
//! │  │   │   Sale    │  │ TaxEngine │  │ format /  │  │ Role →    │  │   │
//! │  │   │ SaleItem  │  │ Breakdown │  │ parse     │  │ Capability│  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Sale, SaleItem, Product, cash register records
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`tax`] - TaxEngine: subtotal / ITBIS / service charge / total
//! - [`ncf`] - NCF sequences, ledger records, format and parse
//! - [`permission`] - Closed role set and the capabilities each role holds
//! - [`error`] - Domain error types and their classification
//! - [`validation`] - Input validation (quantities, series, RNC)
//!
//! ## Example Usage
//!
//! ```rust
//! use fiscal_core::money::Money;
//! use fiscal_core::tax::{TaxEngine, TaxLine};
//! use fiscal_core::types::TaxRate;
//!
//! let lines = [TaxLine::new(1, Money::from_cents(11800), TaxRate::from_bps(1800), true)];
//! let breakdown = TaxEngine::default().compute(&lines, false);
//!
//! assert_eq!(breakdown.subtotal.cents(), 10000);
//! assert_eq!(breakdown.tax_amount.cents(), 1800);
//! assert_eq!(breakdown.total.cents(), 11800);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod ncf;
pub mod permission;
pub mod tax;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::Money;
pub use ncf::*;
pub use permission::{Actor, Capability, Role};
pub use tax::{LineAmounts, TaxBreakdown, TaxEngine, TaxLine};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// ITBIS rate applied when neither the product nor its category carries a
/// tax classification (18%).
pub const DEFAULT_TAX_RATE_BPS: u32 = 1800;

/// Prices without an explicit classification are treated as tax-inclusive.
pub const DEFAULT_TAX_INCLUDED: bool = true;

/// Service charge (propina legal), 10%.
pub const SERVICE_CHARGE_BPS: u32 = 1000;

/// Maximum quantity of a single line.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 9999;

/// Largest number an NCF sequence can reach (8 digits).
pub const MAX_NCF_NUMBER: i64 = 99_999_999;
