//! # Sale Aggregate
//!
//! Editing a pending sale. Every mutation re-reads the sale under the write
//! lock, refuses anything but `pending`, and stores freshly computed running
//! totals in the same transaction.
//!
//! ## Adding an Item
//! ```text
//! add_item(sale, product, qty)
//!      │
//!      ├── sale pending?                     no → InvalidSaleStatus
//!      ├── product exists and active?        no → NotFound
//!      ├── line for product exists?          yes → merge quantities
//!      ├── stock-tracked and stock < total?  yes → InsufficientStock
//!      ├── new line: freeze name, price, tax class (product → category → 18% incl.)
//!      └── recompute totals → store on sale
//! ```

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use super::{new_id, op_span, traced, FiscalEngine};
use crate::error::{DbError, ServiceResult};
use crate::repository::cash::CashRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::retry::with_lock_retry;
use fiscal_core::validation::{validate_quantity, validate_rnc};
use fiscal_core::{
    Actor, Capability, CoreError, Sale, SaleItem, SaleStatus, TaxBreakdown, TaxClass, TaxLine,
    ValidationError,
};

const MAX_CUSTOMER_NAME: usize = 200;

/// A sale with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct SaleDetails {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

impl FiscalEngine {
    /// Opens a pending sale, bound to the actor's register when they have one.
    pub async fn create_sale(&self, actor: &Actor, table_id: Option<&str>) -> ServiceResult<Sale> {
        traced(op_span("create_sale", actor, table_id.unwrap_or("-")), async {
            actor.authorize(Capability::EditSale)?;
            with_lock_retry(self.retry, "create_sale", move || {
                self.create_sale_once(actor, table_id)
            })
            .await
        })
        .await
    }

    async fn create_sale_once(&self, actor: &Actor, table_id: Option<&str>) -> ServiceResult<Sale> {
        let mut tx = self.db.begin_immediate().await?;

        let register = CashRepository::active_register_for_user(&mut tx, &actor.user_id).await?;
        let now = Utc::now();
        let sale = Sale {
            id: new_id(),
            status: SaleStatus::Pending,
            table_id: table_id.map(str::to_string),
            cash_register_id: register.map(|r| r.id),
            created_by: actor.user_id.clone(),
            customer_name: None,
            customer_rnc: None,
            apply_service_charge: false,
            subtotal_cents: 0,
            tax_cents: 0,
            service_charge_cents: 0,
            total_cents: 0,
            ncf: None,
            ncf_type: None,
            ncf_sequence_id: None,
            payment_method: None,
            cash_received_cents: None,
            change_cents: None,
            finalized_by: None,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        SaleRepository::insert(&mut tx, &sale).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(sale_id = %sale.id, register = ?sale.cash_register_id, "Sale created");
        Ok(sale)
    }

    /// Adds a product, merging into the existing line for that product.
    pub async fn add_item(
        &self,
        actor: &Actor,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> ServiceResult<SaleDetails> {
        traced(op_span("add_item", actor, sale_id), async {
            actor.authorize(Capability::EditSale)?;
            validate_quantity(quantity).map_err(CoreError::from)?;
            with_lock_retry(self.retry, "add_item", move || {
                self.add_item_once(sale_id, product_id, quantity)
            })
            .await
        })
        .await
    }

    async fn add_item_once(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> ServiceResult<SaleDetails> {
        let mut tx = self.db.begin_immediate().await?;
        let sale = load_pending(&mut tx, sale_id, "add items").await?;

        let product = ProductRepository::fetch(&mut tx, product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| CoreError::not_found("Product", product_id))?;

        let existing = SaleRepository::find_item_by_product(&mut tx, sale_id, product_id).await?;
        let total_quantity = existing.as_ref().map_or(0, |i| i.quantity) + quantity;
        validate_quantity(total_quantity).map_err(CoreError::from)?;
        if !product.can_sell(total_quantity) {
            return Err(product.shortage(total_quantity).into());
        }

        match existing {
            Some(item) => {
                SaleRepository::update_item_quantity(&mut tx, &item.id, total_quantity).await?;
            }
            None => {
                let category = match &product.category_id {
                    Some(id) => ProductRepository::fetch_category(&mut tx, id).await?,
                    None => None,
                };
                let class = TaxClass::resolve(&product, category.as_ref());
                let item = SaleItem {
                    id: new_id(),
                    sale_id: sale_id.to_string(),
                    product_id: product.id.clone(),
                    name_snapshot: product.name.clone(),
                    unit_price_cents: product.price_cents,
                    quantity,
                    tax_rate_bps: class.rate.bps(),
                    tax_included: class.included,
                    created_at: Utc::now(),
                };
                SaleRepository::insert_item(&mut tx, &item).await?;
            }
        }

        let details = self.store_totals(&mut tx, sale).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(product_id = %product_id, quantity = total_quantity, total = details.sale.total_cents, "Item added");
        Ok(details)
    }

    /// Removes a line from a pending sale.
    pub async fn remove_item(
        &self,
        actor: &Actor,
        sale_id: &str,
        item_id: &str,
    ) -> ServiceResult<SaleDetails> {
        traced(op_span("remove_item", actor, sale_id), async {
            actor.authorize(Capability::EditSale)?;
            with_lock_retry(self.retry, "remove_item", move || {
                self.remove_item_once(sale_id, item_id)
            })
            .await
        })
        .await
    }

    async fn remove_item_once(&self, sale_id: &str, item_id: &str) -> ServiceResult<SaleDetails> {
        let mut tx = self.db.begin_immediate().await?;
        let sale = load_pending(&mut tx, sale_id, "remove items").await?;

        find_line(&mut tx, sale_id, item_id).await?;
        SaleRepository::delete_item(&mut tx, item_id).await?;

        let details = self.store_totals(&mut tx, sale).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(item_id = %item_id, total = details.sale.total_cents, "Item removed");
        Ok(details)
    }

    /// Sets the quantity of a line on a pending sale.
    pub async fn update_quantity(
        &self,
        actor: &Actor,
        sale_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> ServiceResult<SaleDetails> {
        traced(op_span("update_quantity", actor, sale_id), async {
            actor.authorize(Capability::EditSale)?;
            validate_quantity(quantity).map_err(CoreError::from)?;
            with_lock_retry(self.retry, "update_quantity", move || {
                self.update_quantity_once(sale_id, item_id, quantity)
            })
            .await
        })
        .await
    }

    async fn update_quantity_once(
        &self,
        sale_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> ServiceResult<SaleDetails> {
        let mut tx = self.db.begin_immediate().await?;
        let sale = load_pending(&mut tx, sale_id, "change quantities").await?;

        let item = find_line(&mut tx, sale_id, item_id).await?;
        if let Some(product) = ProductRepository::fetch(&mut tx, &item.product_id).await? {
            if !product.can_sell(quantity) {
                return Err(product.shortage(quantity).into());
            }
        }
        SaleRepository::update_item_quantity(&mut tx, item_id, quantity).await?;

        let details = self.store_totals(&mut tx, sale).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(item_id = %item_id, quantity, total = details.sale.total_cents, "Quantity updated");
        Ok(details)
    }

    /// Sets (or clears) the customer identification of a pending sale.
    ///
    /// The RNC is validated and stored as digits only.
    pub async fn set_customer(
        &self,
        actor: &Actor,
        sale_id: &str,
        name: Option<&str>,
        rnc: Option<&str>,
    ) -> ServiceResult<SaleDetails> {
        traced(op_span("set_customer", actor, sale_id), async {
            actor.authorize(Capability::EditSale)?;

            let name = name.map(str::trim).filter(|n| !n.is_empty());
            if name.is_some_and(|n| n.chars().count() > MAX_CUSTOMER_NAME) {
                return Err(CoreError::from(ValidationError::TooLong {
                    field: "customer_name".to_string(),
                    max: MAX_CUSTOMER_NAME,
                })
                .into());
            }
            let rnc = match rnc.map(str::trim).filter(|r| !r.is_empty()) {
                Some(raw) => Some(validate_rnc(raw).map_err(CoreError::from)?),
                None => None,
            };
            let rnc = rnc.as_deref();

            with_lock_retry(self.retry, "set_customer", move || {
                self.set_customer_once(sale_id, name, rnc)
            })
            .await
        })
        .await
    }

    async fn set_customer_once(
        &self,
        sale_id: &str,
        name: Option<&str>,
        rnc: Option<&str>,
    ) -> ServiceResult<SaleDetails> {
        let mut tx = self.db.begin_immediate().await?;
        load_pending(&mut tx, sale_id, "set the customer").await?;

        SaleRepository::set_customer(&mut tx, sale_id, name, rnc, Utc::now()).await?;
        let details = load_details(&mut tx, sale_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        Ok(details)
    }

    /// Turns the 10% service charge on or off for a pending sale.
    pub async fn set_service_charge(
        &self,
        actor: &Actor,
        sale_id: &str,
        apply: bool,
    ) -> ServiceResult<SaleDetails> {
        traced(op_span("set_service_charge", actor, sale_id), async {
            actor.authorize(Capability::EditSale)?;
            with_lock_retry(self.retry, "set_service_charge", move || {
                self.set_service_charge_once(sale_id, apply)
            })
            .await
        })
        .await
    }

    async fn set_service_charge_once(&self, sale_id: &str, apply: bool) -> ServiceResult<SaleDetails> {
        let mut tx = self.db.begin_immediate().await?;
        let mut sale = load_pending(&mut tx, sale_id, "change the service charge").await?;

        SaleRepository::set_service_charge(&mut tx, sale_id, apply, Utc::now()).await?;
        sale.apply_service_charge = apply;

        let details = self.store_totals(&mut tx, sale).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(apply, total = details.sale.total_cents, "Service charge toggled");
        Ok(details)
    }

    /// Reads a sale with its items.
    pub async fn get_sale(&self, sale_id: &str) -> ServiceResult<SaleDetails> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Sale", sale_id))?;
        let items = self.db.sales().get_items(sale_id).await?;
        Ok(SaleDetails { sale, items })
    }

    /// Computes the breakdown for a set of lines with this engine's rates.
    pub(crate) fn totals_for(&self, items: &[SaleItem], apply_service_charge: bool) -> TaxBreakdown {
        let lines: Vec<TaxLine> = items.iter().map(SaleItem::tax_line).collect();
        self.tax.compute(&lines, apply_service_charge)
    }

    /// Recomputes and stores the running totals, returning the fresh view.
    async fn store_totals(
        &self,
        conn: &mut SqliteConnection,
        sale: Sale,
    ) -> ServiceResult<SaleDetails> {
        let items = SaleRepository::fetch_items(conn, &sale.id).await?;
        let totals = self.totals_for(&items, sale.apply_service_charge);
        SaleRepository::update_totals(conn, &sale.id, &totals, Utc::now()).await?;

        let sale = SaleRepository::fetch(conn, &sale.id)
            .await?
            .ok_or_else(|| CoreError::not_found("Sale", sale.id.clone()))?;
        Ok(SaleDetails { sale, items })
    }
}

/// Reads a sale on the locked connection.
pub(crate) async fn load_sale(conn: &mut SqliteConnection, sale_id: &str) -> ServiceResult<Sale> {
    let sale = SaleRepository::fetch(conn, sale_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Sale", sale_id))?;
    Ok(sale)
}

async fn load_pending(
    conn: &mut SqliteConnection,
    sale_id: &str,
    operation: &'static str,
) -> ServiceResult<Sale> {
    let sale = load_sale(conn, sale_id).await?;
    sale.ensure_pending(operation)?;
    Ok(sale)
}

async fn load_details(conn: &mut SqliteConnection, sale_id: &str) -> ServiceResult<SaleDetails> {
    let sale = load_sale(conn, sale_id).await?;
    let items = SaleRepository::fetch_items(conn, sale_id).await?;
    Ok(SaleDetails { sale, items })
}

async fn find_line(
    conn: &mut SqliteConnection,
    sale_id: &str,
    item_id: &str,
) -> ServiceResult<SaleItem> {
    SaleRepository::fetch_items(conn, sale_id)
        .await?
        .into_iter()
        .find(|i| i.id == item_id)
        .ok_or_else(|| CoreError::not_found("SaleItem", item_id).into())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::ServiceError;
    use fiscal_core::ErrorKind;

    #[tokio::test]
    async fn test_create_binds_register() {
        let engine = seeded_engine().await;

        let sale = engine.create_sale(&cashier(), Some("mesa-4")).await.unwrap();
        assert_eq!(sale.status, SaleStatus::Pending);
        assert_eq!(sale.cash_register_id.as_deref(), Some("r-1"));
        assert_eq!(sale.total_cents, 0);

        // The waiter has no register
        let sale = engine.create_sale(&waiter(), None).await.unwrap();
        assert!(sale.cash_register_id.is_none());
    }

    #[tokio::test]
    async fn test_add_merges_and_freezes_tax_class() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), None).await.unwrap();

        engine.add_item(&waiter(), &sale.id, "p-beer", 2).await.unwrap();
        let details = engine.add_item(&waiter(), &sale.id, "p-beer", 1).await.unwrap();
        assert_eq!(details.items.len(), 1);
        assert_eq!(details.items[0].quantity, 3);
        assert_eq!(details.items[0].tax_rate_bps, 1800);
        assert!(!details.items[0].tax_included);

        // 300.00 + 18% exclusive
        assert_eq!(details.sale.subtotal_cents, 30000);
        assert_eq!(details.sale.tax_cents, 5400);
        assert_eq!(details.sale.total_cents, 35400);

        // Category without tax config falls back to 18% inclusive
        let details = engine.add_item(&waiter(), &sale.id, "p-plate", 1).await.unwrap();
        let plate = details.items.iter().find(|i| i.product_id == "p-plate").unwrap();
        assert_eq!(plate.tax_rate_bps, 1800);
        assert!(plate.tax_included);
    }

    #[tokio::test]
    async fn test_stock_checked_only_for_inventory() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), None).await.unwrap();

        engine.add_item(&waiter(), &sale.id, "p-wine", 3).await.unwrap();
        let err = engine.add_item(&waiter(), &sale.id, "p-wine", 1).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::InsufficientStock { available: 3, required: 4, .. })
        ));

        // Consumable with stock 0
        engine.add_item(&waiter(), &sale.id, "p-plate", 5).await.unwrap();

        let details = engine.get_sale(&sale.id).await.unwrap();
        assert_eq!(details.items.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_and_update_quantity() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), None).await.unwrap();

        let details = engine.add_item(&waiter(), &sale.id, "p-beer", 1).await.unwrap();
        let item_id = details.items[0].id.clone();

        let details = engine
            .update_quantity(&waiter(), &sale.id, &item_id, 4)
            .await
            .unwrap();
        assert_eq!(details.sale.total_cents, 47200);

        let err = engine
            .update_quantity(&waiter(), &sale.id, &item_id, 11)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);

        let err = engine
            .update_quantity(&waiter(), &sale.id, &item_id, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let details = engine.remove_item(&waiter(), &sale.id, &item_id).await.unwrap();
        assert!(details.items.is_empty());
        assert_eq!(details.sale.total_cents, 0);

        let err = engine.remove_item(&waiter(), &sale.id, &item_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_customer_and_service_charge() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), None).await.unwrap();
        engine.add_item(&waiter(), &sale.id, "p-beer", 3).await.unwrap();

        let details = engine
            .set_customer(&waiter(), &sale.id, Some("  Ferretería Ochoa "), Some("131-24567-8"))
            .await
            .unwrap();
        assert_eq!(details.sale.customer_name.as_deref(), Some("Ferretería Ochoa"));
        assert_eq!(details.sale.customer_rnc.as_deref(), Some("131245678"));

        let err = engine
            .set_customer(&waiter(), &sale.id, None, Some("12345"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // 300.00 exclusive + service → 30.00 service, 59.40 tax, 389.40 total
        let details = engine.set_service_charge(&waiter(), &sale.id, true).await.unwrap();
        assert_eq!(details.sale.service_charge_cents, 3000);
        assert_eq!(details.sale.tax_cents, 5940);
        assert_eq!(details.sale.total_cents, 38940);
    }

    #[tokio::test]
    async fn test_edits_refused_once_not_pending() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), None).await.unwrap();
        engine
            .cancel_sale(&cashier(), &sale.id, "mesa equivocada")
            .await
            .unwrap();

        let err = engine.add_item(&waiter(), &sale.id, "p-beer", 1).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::InvalidSaleStatus { status: SaleStatus::Cancelled, .. })
        ));
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let err = engine.get_sale("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
