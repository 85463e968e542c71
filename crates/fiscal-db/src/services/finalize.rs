//! # Finalize Orchestrator
//!
//! Turns a pending sale into a fiscal document. Everything happens inside
//! one `BEGIN IMMEDIATE` transaction, so a failure at any step leaves the
//! sale, the stock and the sequence counter exactly as they were.
//!
//! ## Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN IMMEDIATE                                                        │
//! │   1. read sale        completed → cached receipt (already_finalized)    │
//! │                       cancelled → InvalidSaleStatus                     │
//! │   2. items            none → EmptySale                                  │
//! │   3. stock            per product, tracked kinds only                   │
//! │   4. register         bind the cashier's register if unbound            │
//! │   5. allocate NCF     SequenceAllocator                                 │
//! │   6. cash session     cash payments need an open session                │
//! │   7. totals           TaxEngine, payment and RNC checks                 │
//! │   8. debit stock      StockLedger (cause = sale)                        │
//! │   9. complete sale    UPDATE ... WHERE status = 'pending'               │
//! │  10. ledger           NcfLedgerEntry                                    │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrent Finalize
//! ```text
//! Terminal A ── BEGIN IMMEDIATE ── allocate B0100000007 ── COMMIT
//! Terminal B ── BEGIN IMMEDIATE (waits) ─────────────────────────── sale is
//!               completed → returns B0100000007, already_finalized = true
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::allocator::SequenceAllocator;
use super::sale::load_sale;
use super::stock::{StockLedger, StockMove};
use super::{new_id, op_span, traced, FiscalEngine};
use crate::error::{DbError, ServiceResult};
use crate::repository::audit::AuditTrail;
use crate::repository::cash::CashRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::{Completion, SaleRepository};
use crate::retry::with_lock_retry;
use fiscal_core::validation::{validate_cash_cents, validate_rnc};
use fiscal_core::{
    Actor, Capability, CoreError, FinalizedSale, NcfLedgerEntry, NcfType, PaymentMethod,
    SaleStatus, StockCause, ValidationError,
};

/// What the cashier submits to close a sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub sale_id: String,
    pub ncf_type: NcfType,
    pub payment_method: PaymentMethod,
    /// Required for cash payments.
    pub cash_received_cents: Option<i64>,
}

impl FinalizeRequest {
    /// Cash payment, consumidor final.
    pub fn cash(sale_id: impl Into<String>, cash_received_cents: i64) -> Self {
        FinalizeRequest {
            sale_id: sale_id.into(),
            ncf_type: NcfType::FinalConsumer,
            payment_method: PaymentMethod::Cash,
            cash_received_cents: Some(cash_received_cents),
        }
    }

    /// Non-cash payment, consumidor final.
    pub fn paid_with(sale_id: impl Into<String>, payment_method: PaymentMethod) -> Self {
        FinalizeRequest {
            sale_id: sale_id.into(),
            ncf_type: NcfType::FinalConsumer,
            payment_method,
            cash_received_cents: None,
        }
    }

    pub fn with_ncf_type(mut self, ncf_type: NcfType) -> Self {
        self.ncf_type = ncf_type;
        self
    }
}

impl FiscalEngine {
    /// Finalizes a sale: issues its NCF, debits stock and freezes totals.
    ///
    /// Calling it again on a completed sale returns the same receipt with
    /// `already_finalized = true`.
    pub async fn finalize(
        &self,
        actor: &Actor,
        request: FinalizeRequest,
    ) -> ServiceResult<FinalizedSale> {
        traced(op_span("finalize", actor, &request.sale_id), async {
            actor.authorize(Capability::FinalizeSale)?;

            let request = &request;
            with_lock_retry(self.retry, "finalize", move || {
                self.finalize_once(actor, request)
            })
            .await
        })
        .await
    }

    async fn finalize_once(
        &self,
        actor: &Actor,
        request: &FinalizeRequest,
    ) -> ServiceResult<FinalizedSale> {
        let mut tx = self.db.begin_immediate().await?;

        let sale = load_sale(&mut tx, &request.sale_id).await?;
        match sale.status {
            SaleStatus::Completed => {
                let items = SaleRepository::fetch_items(&mut tx, &sale.id).await?;
                info!(sale_id = %sale.id, ncf = ?sale.ncf, "Sale already finalized");
                return Ok(FinalizedSale::build(&sale, &items, true)?);
            }
            SaleStatus::Cancelled => {
                return Err(CoreError::InvalidSaleStatus {
                    sale_id: sale.id,
                    status: sale.status,
                    operation: "finalize",
                }
                .into());
            }
            SaleStatus::Pending => {}
        }

        // Payment fields only matter for a sale still to be finalized
        validate_payment(request)?;

        let items = SaleRepository::fetch_items(&mut tx, &sale.id).await?;
        if items.is_empty() {
            return Err(CoreError::EmptySale(sale.id).into());
        }

        // Lines of one product are checked against the product once
        let mut required: BTreeMap<&str, i64> = BTreeMap::new();
        for item in &items {
            *required.entry(item.product_id.as_str()).or_default() += item.quantity;
        }
        let mut tracked = Vec::new();
        for (product_id, quantity) in required {
            let product = ProductRepository::fetch(&mut tx, product_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Product", product_id))?;
            if !product.can_sell(quantity) {
                return Err(product.shortage(quantity).into());
            }
            if product.kind.tracks_stock() {
                tracked.push((product, quantity));
            }
        }

        let register_id = match &sale.cash_register_id {
            Some(id) => Some(id.clone()),
            None => {
                let register =
                    CashRepository::active_register_for_user(&mut tx, &actor.user_id).await?;
                if let Some(register) = &register {
                    SaleRepository::bind_register(&mut tx, &sale.id, &register.id).await?;
                }
                register.map(|r| r.id)
            }
        };

        let now = Utc::now();
        let allocated = SequenceAllocator::new(self.settings.low_sequence_warning)
            .allocate_next(&mut tx, request.ncf_type, now)
            .await?;

        if request.payment_method.is_cash() {
            let session = match &register_id {
                Some(id) => CashRepository::open_session_for(&mut tx, id).await?,
                None => None,
            };
            if session.is_none() {
                return Err(CoreError::SessionRequired { register_id }.into());
            }
        }

        let totals = self.totals_for(&items, sale.apply_service_charge);
        let cash_received = request
            .cash_received_cents
            .filter(|_| request.payment_method.is_cash());
        let change = match cash_received {
            Some(received) if received < totals.total.cents() => {
                return Err(CoreError::InsufficientPayment {
                    total: totals.total.cents(),
                    received,
                }
                .into());
            }
            Some(received) => Some(received - totals.total.cents()),
            None => None,
        };

        if self.settings.require_rnc && request.ncf_type.requires_rnc() {
            let valid = sale
                .customer_rnc
                .as_deref()
                .is_some_and(|rnc| validate_rnc(rnc).is_ok());
            if !valid {
                return Err(CoreError::RncRequired(request.ncf_type).into());
            }
        }

        for (product, quantity) in &tracked {
            StockLedger::apply(
                &mut tx,
                product,
                StockMove {
                    delta: -quantity,
                    cause: StockCause::Sale,
                    reference_id: Some(&sale.id),
                    reason: None,
                    actor_id: &actor.user_id,
                },
                now,
            )
            .await?;
        }

        SaleRepository::mark_completed(
            &mut tx,
            &sale.id,
            &Completion {
                ncf: &allocated.ncf,
                ncf_type: request.ncf_type,
                sequence_id: &allocated.sequence_id,
                payment_method: request.payment_method,
                cash_received_cents: cash_received,
                change_cents: change,
                finalized_by: &actor.user_id,
                totals,
                completed_at: now,
            },
        )
        .await?;

        AuditTrail::record_issued(
            &mut tx,
            &NcfLedgerEntry {
                id: new_id(),
                sequence_id: allocated.sequence_id.clone(),
                ncf_type: allocated.ncf_type,
                serie: allocated.serie.clone(),
                number: allocated.number,
                ncf: allocated.ncf.clone(),
                sale_id: Some(sale.id.clone()),
                credit_note_id: None,
                issued_by: actor.user_id.clone(),
                cash_register_id: register_id,
                issued_at: now,
            },
        )
        .await?;

        let completed = load_sale(&mut tx, &sale.id).await?;
        let receipt = FinalizedSale::build(&completed, &items, false)?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale.id,
            ncf = %allocated.ncf,
            total = receipt.total_cents,
            payment = ?request.payment_method,
            "Sale finalized"
        );
        Ok(receipt)
    }
}

/// Checks the request's NCF type and cash fields.
fn validate_payment(request: &FinalizeRequest) -> ServiceResult<()> {
    if !request.ncf_type.is_sale_type() {
        return Err(CoreError::from(ValidationError::InvalidFormat {
            field: "ncf_type".to_string(),
            reason: format!("{} is issued through a note, not a sale", request.ncf_type),
        })
        .into());
    }
    if request.payment_method.is_cash() {
        let received = request.cash_received_cents.ok_or_else(|| {
            CoreError::from(ValidationError::Required {
                field: "cash_received".to_string(),
            })
        })?;
        validate_cash_cents(received).map_err(CoreError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::ServiceError;
    use fiscal_core::{ErrorKind, Role};

    async fn sale_with(engine: &FiscalEngine, lines: &[(&str, i64)]) -> String {
        let sale = engine.create_sale(&cashier(), None).await.unwrap();
        for (product_id, quantity) in lines {
            engine
                .add_item(&cashier(), &sale.id, product_id, *quantity)
                .await
                .unwrap();
        }
        sale.id
    }

    async fn current_number(engine: &FiscalEngine, ncf_type: NcfType) -> i64 {
        engine.list_sequences(Some(ncf_type)).await.unwrap()[0].current_number
    }

    #[tokio::test]
    async fn test_exclusive_tax_sale() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-beer", 1)]).await;

        let receipt = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 20000))
            .await
            .unwrap();

        assert_eq!(receipt.ncf, "B0100000001");
        assert_eq!(receipt.subtotal_cents, 10000);
        assert_eq!(receipt.tax_cents, 1800);
        assert_eq!(receipt.total_cents, 11800);
        assert_eq!(receipt.change_cents, Some(8200));
        assert!(!receipt.already_finalized);
        assert_eq!(receipt.items[0].line_tax_cents, 1800);

        assert_eq!(stock_of(&engine, "p-beer").await, 9);
        let history = engine.db().audit().stock_history("p-beer").await.unwrap();
        assert_eq!(history[0].cause, StockCause::Sale);
        assert_eq!(history[0].reference_id.as_deref(), Some(sale_id.as_str()));

        let ledger = engine.db().audit().ledger_for_sale(&sale_id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].ncf, "B0100000001");
        assert_eq!(ledger[0].cash_register_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn test_inclusive_tax_sale() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-wine", 1)]).await;

        let receipt = engine
            .finalize(&cashier(), FinalizeRequest::paid_with(&sale_id, PaymentMethod::Card))
            .await
            .unwrap();

        assert_eq!(receipt.subtotal_cents, 10000);
        assert_eq!(receipt.tax_cents, 1800);
        assert_eq!(receipt.total_cents, 11800);
        assert_eq!(receipt.cash_received_cents, None);
        assert_eq!(receipt.change_cents, None);
    }

    #[tokio::test]
    async fn test_service_charge_sale() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-beer", 3)]).await;
        engine.set_service_charge(&cashier(), &sale_id, true).await.unwrap();

        let receipt = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 38940))
            .await
            .unwrap();

        assert_eq!(receipt.subtotal_cents, 30000);
        assert_eq!(receipt.service_charge_cents, 3000);
        assert_eq!(receipt.tax_cents, 5940);
        assert_eq!(receipt.total_cents, 38940);
        assert_eq!(receipt.change_cents, Some(0));
    }

    #[tokio::test]
    async fn test_refinalize_returns_same_receipt() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-beer", 2)]).await;

        let first = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 30000))
            .await
            .unwrap();
        let second = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 30000))
            .await
            .unwrap();

        assert!(second.already_finalized);
        assert_eq!(first.ncf, second.ncf);
        assert_eq!(current_number(&engine, NcfType::FinalConsumer).await, 2);
        assert_eq!(stock_of(&engine, "p-beer").await, 8);
        assert_eq!(
            engine.db().audit().ledger_for_sale(&sale_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_refinalize_ignores_payment_fields() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-beer", 1)]).await;
        let first = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 20000))
            .await
            .unwrap();

        let mut retry = FinalizeRequest::cash(&sale_id, 0);
        retry.cash_received_cents = None;
        let second = engine.finalize(&cashier(), retry).await.unwrap();
        assert!(second.already_finalized);
        assert_eq!(second.ncf, first.ncf);
        assert_eq!(second.cash_received_cents, Some(20000));

        let third = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, -1))
            .await
            .unwrap();
        assert!(third.already_finalized);
        assert_eq!(third.ncf, first.ncf);
        assert_eq!(current_number(&engine, NcfType::FinalConsumer).await, 2);
    }

    #[tokio::test]
    async fn test_failed_finalize_changes_nothing() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-beer", 2)]).await;

        let session = engine.db().cash().get_open_session("r-1").await.unwrap().unwrap();
        engine.db().cash().close_session(&session.id).await.unwrap();

        let err = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 30000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::SessionRequired { register_id: Some(_) })
        ));
        assert_eq!(err.kind(), ErrorKind::BusinessRule);

        assert_eq!(current_number(&engine, NcfType::FinalConsumer).await, 1);
        assert_eq!(stock_of(&engine, "p-beer").await, 10);
        let details = engine.get_sale(&sale_id).await.unwrap();
        assert_eq!(details.sale.status, SaleStatus::Pending);
        assert!(details.sale.ncf.is_none());
        assert!(engine.db().audit().stock_history("p-beer").await.unwrap().is_empty());

        // A card payment needs no session
        let receipt = engine
            .finalize(&cashier(), FinalizeRequest::paid_with(&sale_id, PaymentMethod::Card))
            .await
            .unwrap();
        assert_eq!(receipt.ncf, "B0100000001");
    }

    #[tokio::test]
    async fn test_rejections() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-beer", 1)]).await;

        let err = engine
            .finalize(&waiter(), FinalizeRequest::cash(&sale_id, 20000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale_id, 10000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::InsufficientPayment { total: 11800, received: 10000 })
        ));

        let mut request = FinalizeRequest::cash(&sale_id, 20000);
        request.cash_received_cents = None;
        let err = engine.finalize(&cashier(), request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .finalize(
                &cashier(),
                FinalizeRequest::cash(&sale_id, 20000).with_ncf_type(NcfType::CreditNote),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .finalize(
                &cashier(),
                FinalizeRequest::cash(&sale_id, 20000).with_ncf_type(NcfType::TaxCredit),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::RncRequired(NcfType::TaxCredit))
        ));

        let empty = sale_with(&engine, &[]).await;
        let err = engine
            .finalize(&cashier(), FinalizeRequest::cash(&empty, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::EmptySale(_))));

        // Sequence counters untouched by all of the above
        assert_eq!(current_number(&engine, NcfType::FinalConsumer).await, 1);
        assert_eq!(current_number(&engine, NcfType::TaxCredit).await, 1);
    }

    #[tokio::test]
    async fn test_tax_credit_with_rnc() {
        let engine = seeded_engine().await;
        let sale_id = sale_with(&engine, &[("p-plate", 2)]).await;
        engine
            .set_customer(&cashier(), &sale_id, Some("Ferretería Ochoa"), Some("131245678"))
            .await
            .unwrap();

        let receipt = engine
            .finalize(
                &cashier(),
                FinalizeRequest::paid_with(&sale_id, PaymentMethod::Transfer)
                    .with_ncf_type(NcfType::TaxCredit),
            )
            .await
            .unwrap();

        assert_eq!(receipt.ncf, "B0200000001");
        assert_eq!(receipt.customer_rnc.as_deref(), Some("131245678"));
        // Consumables are not debited
        assert_eq!(stock_of(&engine, "p-plate").await, 0);
    }

    #[tokio::test]
    async fn test_stock_rechecked_at_finalize() {
        let engine = seeded_engine().await;
        let first = sale_with(&engine, &[("p-wine", 2)]).await;
        let second = sale_with(&engine, &[("p-wine", 2)]).await;

        engine
            .finalize(&cashier(), FinalizeRequest::paid_with(&first, PaymentMethod::Card))
            .await
            .unwrap();
        let err = engine
            .finalize(&cashier(), FinalizeRequest::paid_with(&second, PaymentMethod::Card))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::InsufficientStock { available: 1, required: 2, .. })
        ));
        assert_eq!(current_number(&engine, NcfType::FinalConsumer).await, 2);
    }

    #[tokio::test]
    async fn test_register_bound_at_finalize() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), Some("mesa-2")).await.unwrap();
        engine.add_item(&waiter(), &sale.id, "p-beer", 1).await.unwrap();
        assert!(sale.cash_register_id.is_none());

        engine
            .finalize(&cashier(), FinalizeRequest::cash(&sale.id, 11800))
            .await
            .unwrap();

        let details = engine.get_sale(&sale.id).await.unwrap();
        assert_eq!(details.sale.cash_register_id.as_deref(), Some("r-1"));
        assert_eq!(details.sale.finalized_by.as_deref(), Some("u-cashier"));

        // An owner without a register cannot take cash
        let owner = Actor::new("u-owner", Role::Administrator);
        let sale = engine.create_sale(&owner, None).await.unwrap();
        engine.add_item(&owner, &sale.id, "p-beer", 1).await.unwrap();

        let err = engine
            .finalize(&owner, FinalizeRequest::cash(&sale.id, 11800))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::SessionRequired { register_id: None })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finalize_issues_one_ncf() {
        let path = std::env::temp_dir().join(format!("fiscal-finalize-{}.db", new_id()));
        let engine = seeded_file_engine(&path).await;
        let sale_id = sale_with(&engine, &[("p-beer", 3)]).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = engine.clone();
            let sale_id = sale_id.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .finalize(&cashier(), FinalizeRequest::cash(sale_id, 50000))
                    .await
            }));
        }

        let mut receipts = Vec::new();
        for handle in handles {
            receipts.push(handle.await.unwrap().unwrap());
        }

        assert!(receipts.iter().all(|r| r.ncf == receipts[0].ncf));
        assert_eq!(receipts.iter().filter(|r| !r.already_finalized).count(), 1);
        assert_eq!(
            engine.db().audit().ledger_for_sale(&sale_id).await.unwrap().len(),
            1
        );
        assert_eq!(stock_of(&engine, "p-beer").await, 7);
        assert_eq!(current_number(&engine, NcfType::FinalConsumer).await, 2);

        engine.db().close().await;
        let _ = std::fs::remove_file(&path);
    }
}
