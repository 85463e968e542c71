//! # Domain Types
//!
//! Sales, line items and the catalog/cash read models the engine depends on.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │    SaleItem     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  price_cents    │   │  status         │   │  unit_price     │ frozen│
//! │  │  stock          │   │  ncf (nullable) │   │  tax_rate_bps   │ at    │
//! │  │  kind           │   │  totals snapshot│   │  tax_included   │ add   │
//! │  │  tax class?     │   │  payment info   │   │  quantity > 0   │       │
//! │  └────────┬────────┘   └─────────────────┘   └─────────────────┘       │
//! │           │ fallback                                                    │
//! │  ┌────────▼────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Category     │   │  CashRegister   │   │ StockAdjustment │       │
//! │  │  tax class?     │   │  CashSession    │   │ (append-only)   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sale Lifecycle
//! ```text
//! pending ──finalize──► completed ──cancel──► cancelled
//!    │                                            ▲
//!    └───────────────────cancel───────────────────┘
//! ```
//! `cancelled` is terminal. Items change only while `pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::ncf::NcfType;
use crate::tax::TaxLine;
use crate::{DEFAULT_TAX_INCLUDED, DEFAULT_TAX_RATE_BPS};

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1800 bps = 18% (standard ITBIS), 1600 bps = 16% (reduced ITBIS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate (exempt).
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::from_bps(DEFAULT_TAX_RATE_BPS)
    }
}

/// A resolved tax classification: the rate and whether prices embed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxClass {
    pub rate: TaxRate,
    pub included: bool,
}

impl TaxClass {
    /// Resolves the classification of a product at item-add time.
    ///
    /// ## Resolution Order
    /// ```text
    /// product.tax_rate_bps set?  ──yes──► product's rate + included flag
    ///        │ no
    ///        ▼
    /// category.tax_rate_bps set? ──yes──► category's rate + included flag
    ///        │ no
    ///        ▼
    /// 18% inclusive
    /// ```
    /// A missing `included` flag next to a present rate defaults to inclusive.
    pub fn resolve(product: &Product, category: Option<&Category>) -> TaxClass {
        if let Some(bps) = product.tax_rate_bps {
            return TaxClass {
                rate: TaxRate::from_bps(bps),
                included: product.tax_included.unwrap_or(DEFAULT_TAX_INCLUDED),
            };
        }
        if let Some(bps) = category.and_then(|c| c.tax_rate_bps) {
            return TaxClass {
                rate: TaxRate::from_bps(bps),
                included: category
                    .and_then(|c| c.tax_included)
                    .unwrap_or(DEFAULT_TAX_INCLUDED),
            };
        }
        TaxClass::default()
    }
}

impl Default for TaxClass {
    fn default() -> Self {
        TaxClass {
            rate: TaxRate::from_bps(DEFAULT_TAX_RATE_BPS),
            included: DEFAULT_TAX_INCLUDED,
        }
    }
}

// =============================================================================
// Catalog Read Model
// =============================================================================

/// Whether a product's stock is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Stock-tracked: checked on add, debited on finalize.
    Inventory,
    /// Prepared or service items: never checked, never debited.
    Consumable,
}

impl ProductKind {
    #[inline]
    pub fn tracks_stock(&self) -> bool {
        matches!(self, ProductKind::Inventory)
    }
}

/// Product category, the fallback source of tax classification.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub tax_rate_bps: Option<u32>,
    pub tax_included: Option<bool>,
}

/// A product as the engine reads it. Owned by the inventory collaborator;
/// the engine only mutates `stock`, under lock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category_id: Option<String>,
    /// Price in centavos.
    pub price_cents: i64,
    pub stock: i64,
    pub kind: ProductKind,
    /// Own tax classification; `None` defers to the category.
    pub tax_rate_bps: Option<u32>,
    pub tax_included: Option<bool>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Checks whether `quantity` units can be sold.
    ///
    /// Consumables always pass.
    pub fn can_sell(&self, quantity: i64) -> bool {
        !self.kind.tracks_stock() || self.stock >= quantity
    }

    /// Builds the error for a failed [`Product::can_sell`].
    pub fn shortage(&self, required: i64) -> CoreError {
        CoreError::InsufficientStock {
            product_id: self.id.clone(),
            product: self.name.clone(),
            available: self.stock,
            required,
        }
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Items are being added.
    Pending,
    /// NCF issued, stock debited.
    Completed,
    /// Terminal. Keeps the NCF it was issued, if any.
    Cancelled,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Requires an open cash session; change is computed.
    Cash,
    /// Card on an external terminal.
    Card,
    /// Bank transfer.
    Transfer,
}

impl PaymentMethod {
    #[inline]
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale and its frozen totals snapshot.
///
/// ## Invariants
/// - `ncf` is set exactly when the sale has been completed (a cancelled sale
///   keeps the NCF it was issued)
/// - `total_cents = subtotal_cents + tax_cents + service_charge_cents`
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub status: SaleStatus,
    pub table_id: Option<String>,
    pub cash_register_id: Option<String>,
    pub created_by: String,
    pub customer_name: Option<String>,
    pub customer_rnc: Option<String>,
    pub apply_service_charge: bool,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub service_charge_cents: i64,
    pub total_cents: i64,
    pub ncf: Option<String>,
    pub ncf_type: Option<NcfType>,
    pub ncf_sequence_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub cash_received_cents: Option<i64>,
    pub change_cents: Option<i64>,
    pub finalized_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Fails with `InvalidSaleStatus` unless the sale is pending.
    pub fn ensure_pending(&self, operation: &'static str) -> CoreResult<()> {
        if self.status != SaleStatus::Pending {
            return Err(CoreError::InvalidSaleStatus {
                sale_id: self.id.clone(),
                status: self.status,
                operation,
            });
        }
        Ok(())
    }

    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale.
///
/// Price and tax classification are frozen when the line is added and are
/// never re-derived from live product configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    /// Unit price in centavos at time of sale (frozen).
    pub unit_price_cents: i64,
    pub quantity: i64,
    /// Tax rate at time of sale (frozen).
    pub tax_rate_bps: u32,
    /// Whether the frozen price embeds the tax.
    pub tax_included: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// The TaxEngine input for this line.
    #[inline]
    pub fn tax_line(&self) -> TaxLine {
        TaxLine::new(
            self.quantity,
            self.unit_price(),
            TaxRate::from_bps(self.tax_rate_bps),
            self.tax_included,
        )
    }

    /// The same frozen line with a different quantity (credit/debit notes).
    #[inline]
    pub fn tax_line_for(&self, quantity: i64) -> TaxLine {
        TaxLine::new(
            quantity,
            self.unit_price(),
            TaxRate::from_bps(self.tax_rate_bps),
            self.tax_included,
        )
    }
}

// =============================================================================
// Cash Register / Session
// =============================================================================

/// A physical register. `user_id` binds it to the cashier working it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashRegister {
    pub id: String,
    pub name: String,
    pub user_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A cash drawer session. At most one is open per register.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashSession {
    pub id: String,
    pub cash_register_id: String,
    pub opened_by: String,
    pub opening_cents: i64,
    pub status: SessionStatus,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Stock Adjustment
// =============================================================================

/// What caused a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockCause {
    /// Debit on finalize.
    Sale,
    /// Restore on cancellation.
    SaleCancelled,
    /// Restore on credit note.
    CreditNote,
    /// Manual correction by a manager.
    Manual,
}

/// Append-only record of one stock mutation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockAdjustment {
    pub id: String,
    pub product_id: String,
    pub cause: StockCause,
    pub old_stock: i64,
    pub delta: i64,
    pub new_stock: i64,
    pub reason: Option<String>,
    /// Sale or credit note id that caused the movement.
    pub reference_id: Option<String>,
    pub actor_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Receipt View
// =============================================================================

/// One receipt line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptLine {
    pub sale_item_id: String,
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    pub tax_included: bool,
    /// quantity × unit price, as charged.
    pub line_total_cents: i64,
    /// ITBIS share of the line.
    pub line_tax_cents: i64,
}

/// What the receipt collaborator renders after a finalize.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FinalizedSale {
    pub sale_id: String,
    pub ncf: String,
    pub ncf_type: NcfType,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub completed_at: DateTime<Utc>,
    pub items: Vec<ReceiptLine>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub service_charge_cents: i64,
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    pub cash_received_cents: Option<i64>,
    pub change_cents: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_rnc: Option<String>,
    /// True when this call found the sale already completed.
    pub already_finalized: bool,
}

impl FinalizedSale {
    /// Builds the receipt view from a completed sale and its frozen items.
    pub fn build(sale: &Sale, items: &[SaleItem], already_finalized: bool) -> CoreResult<Self> {
        let not_completed = || CoreError::InvalidSaleStatus {
            sale_id: sale.id.clone(),
            status: sale.status,
            operation: "render a receipt",
        };
        if sale.status != SaleStatus::Completed {
            return Err(not_completed());
        }
        let (ncf, ncf_type, payment_method, completed_at) = match (
            sale.ncf.clone(),
            sale.ncf_type,
            sale.payment_method,
            sale.completed_at,
        ) {
            (Some(ncf), Some(t), Some(p), Some(at)) => (ncf, t, p, at),
            _ => return Err(not_completed()),
        };

        let items = items
            .iter()
            .map(|item| {
                let amounts = crate::tax::line_amounts(&item.tax_line());
                ReceiptLine {
                    sale_item_id: item.id.clone(),
                    product_id: item.product_id.clone(),
                    name: item.name_snapshot.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    tax_rate_bps: item.tax_rate_bps,
                    tax_included: item.tax_included,
                    line_total_cents: amounts.gross.cents(),
                    line_tax_cents: amounts.tax.cents(),
                }
            })
            .collect();

        Ok(FinalizedSale {
            sale_id: sale.id.clone(),
            ncf,
            ncf_type,
            created_at: sale.created_at,
            completed_at,
            items,
            subtotal_cents: sale.subtotal_cents,
            tax_cents: sale.tax_cents,
            service_charge_cents: sale.service_charge_cents,
            total_cents: sale.total_cents,
            payment_method,
            cash_received_cents: sale.cash_received_cents,
            change_cents: sale.change_cents,
            customer_name: sale.customer_name.clone(),
            customer_rnc: sale.customer_rnc.clone(),
            already_finalized,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product(tax_rate_bps: Option<u32>, tax_included: Option<bool>) -> Product {
        let now = Utc::now();
        Product {
            id: "p-1".to_string(),
            name: "Presidente".to_string(),
            category_id: Some("c-1".to_string()),
            price_cents: 15000,
            stock: 3,
            kind: ProductKind::Inventory,
            tax_rate_bps,
            tax_included,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn category(tax_rate_bps: Option<u32>, tax_included: Option<bool>) -> Category {
        Category {
            id: "c-1".to_string(),
            name: "Bebidas".to_string(),
            tax_rate_bps,
            tax_included,
        }
    }

    #[test]
    fn test_tax_class_prefers_product() {
        let class = TaxClass::resolve(
            &product(Some(1600), Some(false)),
            Some(&category(Some(1800), Some(true))),
        );
        assert_eq!(class.rate.bps(), 1600);
        assert!(!class.included);
    }

    #[test]
    fn test_tax_class_falls_back_to_category_then_default() {
        let class = TaxClass::resolve(&product(None, None), Some(&category(Some(0), Some(false))));
        assert_eq!(class.rate.bps(), 0);
        assert!(!class.included);

        let class = TaxClass::resolve(&product(None, None), Some(&category(None, None)));
        assert_eq!(class, TaxClass::default());
        assert_eq!(class.rate.bps(), 1800);
        assert!(class.included);

        let class = TaxClass::resolve(&product(None, None), None);
        assert_eq!(class, TaxClass::default());
    }

    #[test]
    fn test_can_sell_respects_kind() {
        let mut p = product(None, None);
        assert!(p.can_sell(3));
        assert!(!p.can_sell(4));

        p.kind = ProductKind::Consumable;
        p.stock = 0;
        assert!(p.can_sell(50));
    }

    #[test]
    fn test_sale_status_default() {
        assert_eq!(SaleStatus::default(), SaleStatus::Pending);
    }
}
