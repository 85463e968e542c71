//! # Reversal Workflow
//!
//! Undoing a sale after the fact: cancellation, and credit/debit notes
//! against a completed sale.
//!
//! ## Cancel
//! ```text
//! pending    ──► cancelled   nothing else (no NCF, stock never moved)
//! completed  ──► cancelled   + CancelledNcf(ncf)
//!                            + stock restored (sold minus already credited)
//! cancelled  ──► InvalidSaleStatus
//! ```
//!
//! ## Notes
//! ```text
//! completed sale B0100000042
//!      │ credit 2 × line A
//!      ▼
//! quantities ≤ sold (credit: cumulative over earlier credit notes)
//!      │
//!      ▼
//! amounts from the frozen line snapshots, no service charge
//!      │
//!      ▼
//! NCF from the nota_credito sequence, letter taken from the parent:
//!     B01… + B04 sequence → B04…
//!     E31… + B04 sequence → E04…
//!      │
//!      ▼
//! ledger row (credit_note_id) + stock restored (credit notes only)
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use super::allocator::SequenceAllocator;
use super::sale::load_sale;
use super::stock::{StockLedger, StockMove};
use super::{new_id, op_span, traced, FiscalEngine};
use crate::error::{DbError, ServiceResult};
use crate::repository::audit::AuditTrail;
use crate::repository::note::NoteRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::retry::with_lock_retry;
use fiscal_core::tax::line_amounts;
use fiscal_core::validation::{validate_quantity, validate_reason};
use fiscal_core::{
    derive_note_serie, format_ncf, parse_ncf, Actor, CancelledNcf, Capability, CoreError,
    CreditNote, CreditNoteItem, NcfLedgerEntry, NoteType, Sale, SaleItem, SaleStatus, StockCause,
    TaxLine, ValidationError,
};

/// One line of a note request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteLine {
    pub sale_item_id: String,
    pub quantity: i64,
}

/// Input for [`FiscalEngine::create_note`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRequest {
    pub sale_id: String,
    pub note_type: NoteType,
    pub items: Vec<NoteLine>,
    pub reason: String,
}

/// A note with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct NoteDetails {
    pub note: CreditNote,
    pub items: Vec<CreditNoteItem>,
}

impl FiscalEngine {
    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancels a pending or completed sale.
    ///
    /// A completed sale keeps its NCF; the number is retired in
    /// `cancelled_ncfs` and never reissued.
    pub async fn cancel_sale(
        &self,
        actor: &Actor,
        sale_id: &str,
        reason: &str,
    ) -> ServiceResult<Sale> {
        traced(op_span("cancel_sale", actor, sale_id), async {
            actor.authorize(Capability::CancelSale)?;
            let reason = validate_reason(reason).map_err(CoreError::from)?;
            let reason = reason.as_str();

            with_lock_retry(self.retry, "cancel_sale", move || {
                self.cancel_sale_once(actor, sale_id, reason)
            })
            .await
        })
        .await
    }

    async fn cancel_sale_once(
        &self,
        actor: &Actor,
        sale_id: &str,
        reason: &str,
    ) -> ServiceResult<Sale> {
        let mut tx = self.db.begin_immediate().await?;
        let sale = load_sale(&mut tx, sale_id).await?;
        let now = Utc::now();

        match (sale.status, &sale.ncf, sale.ncf_type) {
            (SaleStatus::Cancelled, _, _) => {
                return Err(CoreError::InvalidSaleStatus {
                    sale_id: sale.id,
                    status: sale.status,
                    operation: "cancel",
                }
                .into());
            }
            (SaleStatus::Pending, _, _) => {
                SaleRepository::mark_cancelled(&mut tx, sale_id, reason, &actor.user_id, now)
                    .await?;
            }
            (SaleStatus::Completed, Some(ncf), Some(ncf_type)) => {
                SaleRepository::mark_cancelled(&mut tx, sale_id, reason, &actor.user_id, now)
                    .await?;
                AuditTrail::record_cancelled(
                    &mut tx,
                    &CancelledNcf {
                        id: new_id(),
                        ncf: ncf.clone(),
                        ncf_type,
                        sale_id: sale.id.clone(),
                        reason: reason.to_string(),
                        cancelled_by: actor.user_id.clone(),
                        cancelled_at: now,
                    },
                )
                .await?;
                restore_sold_stock(&mut tx, &sale, actor, reason, now).await?;
            }
            (SaleStatus::Completed, _, _) => {
                return Err(DbError::ConstraintViolation {
                    message: format!("completed sale {} has no NCF", sale.id),
                }
                .into());
            }
        }

        let cancelled = load_sale(&mut tx, sale_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            ncf = ?cancelled.ncf,
            was = ?sale.status,
            "Sale cancelled"
        );
        Ok(cancelled)
    }

    // =========================================================================
    // Credit / debit notes
    // =========================================================================

    /// Issues a credit or debit note against a completed sale.
    ///
    /// ## Errors
    /// - `Validation` for an empty item list, bad quantity or blank reason
    /// - `InvalidSaleStatus` unless the sale is completed
    /// - `QuantityExceedsSold` past the returnable quantity of a line
    /// - allocator errors for the note's sequence type
    pub async fn create_note(
        &self,
        actor: &Actor,
        request: NoteRequest,
    ) -> ServiceResult<NoteDetails> {
        traced(op_span("create_note", actor, &request.sale_id), async {
            actor.authorize(Capability::IssueNote)?;
            let reason = validate_reason(&request.reason).map_err(CoreError::from)?;

            if request.items.is_empty() {
                return Err(CoreError::from(ValidationError::Required {
                    field: "items".to_string(),
                })
                .into());
            }
            let mut lines: BTreeMap<&str, i64> = BTreeMap::new();
            for line in &request.items {
                validate_quantity(line.quantity).map_err(CoreError::from)?;
                *lines.entry(line.sale_item_id.as_str()).or_default() += line.quantity;
            }
            for quantity in lines.values() {
                validate_quantity(*quantity).map_err(CoreError::from)?;
            }

            let (request, reason, lines) = (&request, reason.as_str(), &lines);
            with_lock_retry(self.retry, "create_note", move || {
                self.create_note_once(actor, request, reason, lines)
            })
            .await
        })
        .await
    }

    async fn create_note_once(
        &self,
        actor: &Actor,
        request: &NoteRequest,
        reason: &str,
        lines: &BTreeMap<&str, i64>,
    ) -> ServiceResult<NoteDetails> {
        let mut tx = self.db.begin_immediate().await?;

        let sale = load_sale(&mut tx, &request.sale_id).await?;
        let parent_ncf = match (&sale.status, &sale.ncf) {
            (SaleStatus::Completed, Some(ncf)) => ncf.clone(),
            _ => {
                return Err(CoreError::InvalidSaleStatus {
                    sale_id: sale.id,
                    status: sale.status,
                    operation: "issue a note",
                }
                .into());
            }
        };

        let sale_items = SaleRepository::fetch_items(&mut tx, &sale.id).await?;
        let credited = match request.note_type {
            NoteType::Credit => NoteRepository::credited_quantities(&mut tx, &sale.id).await?,
            NoteType::Debit => HashMap::new(),
        };

        let mut chosen: Vec<(&SaleItem, i64)> = Vec::with_capacity(lines.len());
        for (&sale_item_id, &quantity) in lines {
            let item = sale_items
                .iter()
                .find(|i| i.id == sale_item_id)
                .ok_or_else(|| CoreError::not_found("SaleItem", sale_item_id))?;
            let already_credited = credited.get(sale_item_id).copied().unwrap_or(0);
            if already_credited + quantity > item.quantity {
                return Err(CoreError::QuantityExceedsSold {
                    sale_item_id: item.id.clone(),
                    sold: item.quantity,
                    already_credited,
                    requested: quantity,
                }
                .into());
            }
            chosen.push((item, quantity));
        }

        let tax_lines: Vec<TaxLine> = chosen
            .iter()
            .map(|(item, quantity)| item.tax_line_for(*quantity))
            .collect();
        let totals = self.tax.compute(&tax_lines, false);

        let now = Utc::now();
        let allocated = SequenceAllocator::new(self.settings.low_sequence_warning)
            .allocate_next(&mut tx, request.note_type.ncf_type(), now)
            .await?;
        let (parent_serie, _) = parse_ncf(&parent_ncf).map_err(CoreError::from)?;
        let serie = derive_note_serie(&parent_serie, &allocated.serie);
        let ncf = format_ncf(&serie, allocated.number);

        let note = CreditNote {
            id: new_id(),
            note_type: request.note_type,
            original_sale_id: sale.id.clone(),
            original_ncf: parent_ncf,
            ncf: ncf.clone(),
            ncf_sequence_id: allocated.sequence_id.clone(),
            reason: reason.to_string(),
            subtotal_cents: totals.subtotal.cents(),
            tax_cents: totals.tax_amount.cents(),
            total_cents: totals.total.cents(),
            customer_name: sale.customer_name.clone(),
            customer_rnc: sale.customer_rnc.clone(),
            created_by: actor.user_id.clone(),
            created_at: now,
        };
        NoteRepository::insert(&mut tx, &note).await?;

        let mut items = Vec::with_capacity(chosen.len());
        for (sale_item, quantity) in &chosen {
            let amounts = line_amounts(&sale_item.tax_line_for(*quantity));
            let item = CreditNoteItem {
                id: new_id(),
                credit_note_id: note.id.clone(),
                sale_item_id: sale_item.id.clone(),
                product_id: sale_item.product_id.clone(),
                quantity: *quantity,
                unit_price_cents: sale_item.unit_price_cents,
                tax_rate_bps: sale_item.tax_rate_bps,
                tax_included: sale_item.tax_included,
                line_total_cents: amounts.gross.cents(),
                line_tax_cents: amounts.tax.cents(),
            };
            NoteRepository::insert_item(&mut tx, &item).await?;
            items.push(item);
        }

        AuditTrail::record_issued(
            &mut tx,
            &NcfLedgerEntry {
                id: new_id(),
                sequence_id: allocated.sequence_id.clone(),
                ncf_type: allocated.ncf_type,
                serie,
                number: allocated.number,
                ncf,
                sale_id: None,
                credit_note_id: Some(note.id.clone()),
                issued_by: actor.user_id.clone(),
                cash_register_id: sale.cash_register_id.clone(),
                issued_at: now,
            },
        )
        .await?;

        if request.note_type == NoteType::Credit {
            let returned = chosen
                .iter()
                .map(|(item, quantity)| (item.product_id.as_str(), *quantity));
            restore_stock(&mut tx, returned, StockCause::CreditNote, &note.id, actor, reason, now)
                .await?;
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            note_id = %note.id,
            ncf = %note.ncf,
            original_ncf = %note.original_ncf,
            note_type = ?note.note_type,
            total = note.total_cents,
            "Note issued"
        );
        Ok(NoteDetails { note, items })
    }

    /// Reads a note with its lines.
    pub async fn get_note(&self, note_id: &str) -> ServiceResult<NoteDetails> {
        let note = self
            .db
            .notes()
            .get_by_id(note_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CreditNote", note_id))?;
        let items = self.db.notes().get_items(note_id).await?;
        Ok(NoteDetails { note, items })
    }

    /// Notes issued against a sale, oldest first.
    pub async fn notes_for_sale(&self, sale_id: &str) -> ServiceResult<Vec<CreditNote>> {
        Ok(self.db.notes().list_for_sale(sale_id).await?)
    }
}

/// Returns to stock what a completed sale still holds: sold quantity minus
/// what credit notes already gave back.
async fn restore_sold_stock(
    conn: &mut SqliteConnection,
    sale: &Sale,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let items = SaleRepository::fetch_items(conn, &sale.id).await?;
    let credited = NoteRepository::credited_quantities(conn, &sale.id).await?;

    let outstanding = items.iter().map(|item| {
        let returned = credited.get(&item.id).copied().unwrap_or(0);
        (item.product_id.as_str(), item.quantity - returned)
    });
    restore_stock(conn, outstanding, StockCause::SaleCancelled, &sale.id, actor, reason, now).await
}

/// Adds quantities back to stock-tracked products, one movement per product.
async fn restore_stock<'a>(
    conn: &mut SqliteConnection,
    quantities: impl Iterator<Item = (&'a str, i64)>,
    cause: StockCause,
    reference_id: &str,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let mut per_product: BTreeMap<&str, i64> = BTreeMap::new();
    for (product_id, quantity) in quantities {
        *per_product.entry(product_id).or_default() += quantity;
    }

    for (product_id, quantity) in per_product {
        if quantity <= 0 {
            continue;
        }
        let product = ProductRepository::fetch(conn, product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", product_id))?;
        if !product.kind.tracks_stock() {
            continue;
        }
        StockLedger::apply(
            conn,
            &product,
            StockMove {
                delta: quantity,
                cause,
                reference_id: Some(reference_id),
                reason: Some(reason),
                actor_id: &actor.user_id,
            },
            now,
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::finalize::FinalizeRequest;
    use super::super::sequence_admin::NewSequence;
    use super::super::test_support::*;
    use super::*;
    use crate::error::ServiceError;
    use fiscal_core::{ErrorKind, NcfType, PaymentMethod};

    async fn completed_sale(engine: &FiscalEngine, product_id: &str, quantity: i64) -> (String, String) {
        let sale = engine.create_sale(&cashier(), None).await.unwrap();
        let details = engine
            .add_item(&cashier(), &sale.id, product_id, quantity)
            .await
            .unwrap();
        engine
            .finalize(&cashier(), FinalizeRequest::paid_with(&sale.id, PaymentMethod::Card))
            .await
            .unwrap();
        (sale.id, details.items[0].id.clone())
    }

    fn credit(sale_id: &str, sale_item_id: &str, quantity: i64) -> NoteRequest {
        NoteRequest {
            sale_id: sale_id.to_string(),
            note_type: NoteType::Credit,
            items: vec![NoteLine {
                sale_item_id: sale_item_id.to_string(),
                quantity,
            }],
            reason: "devolución".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cancel_completed_sale_restores_stock() {
        let engine = seeded_engine().await;
        let (sale_id, _) = completed_sale(&engine, "p-beer", 3).await;
        assert_eq!(stock_of(&engine, "p-beer").await, 7);

        let sale = engine
            .cancel_sale(&cashier(), &sale_id, "cliente se retiró")
            .await
            .unwrap();
        assert_eq!(sale.status, SaleStatus::Cancelled);
        assert_eq!(sale.ncf.as_deref(), Some("B0100000001"));
        assert_eq!(sale.cancelled_by.as_deref(), Some("u-cashier"));
        assert_eq!(stock_of(&engine, "p-beer").await, 10);

        let retired = engine
            .db()
            .audit()
            .cancelled_ncf("B0100000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retired.sale_id, sale_id);
        assert_eq!(retired.reason, "cliente se retiró");

        let history = engine.db().audit().stock_history("p-beer").await.unwrap();
        assert_eq!(history.last().unwrap().cause, StockCause::SaleCancelled);
        assert_eq!(history.last().unwrap().delta, 3);

        let err = engine
            .cancel_sale(&cashier(), &sale_id, "otra vez")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(stock_of(&engine, "p-beer").await, 10);

        // The retired number is never reissued
        let (next, _) = completed_sale(&engine, "p-beer", 1).await;
        let next = engine.get_sale(&next).await.unwrap();
        assert_eq!(next.sale.ncf.as_deref(), Some("B0100000002"));
    }

    #[tokio::test]
    async fn test_cancel_pending_sale_moves_nothing() {
        let engine = seeded_engine().await;
        let sale = engine.create_sale(&waiter(), None).await.unwrap();
        engine.add_item(&waiter(), &sale.id, "p-beer", 2).await.unwrap();

        let err = engine.cancel_sale(&waiter(), &sale.id, "error").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        let err = engine.cancel_sale(&cashier(), &sale.id, "  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let cancelled = engine.cancel_sale(&cashier(), &sale.id, "error").await.unwrap();
        assert_eq!(cancelled.status, SaleStatus::Cancelled);
        assert!(cancelled.ncf.is_none());
        assert_eq!(stock_of(&engine, "p-beer").await, 10);
        assert!(engine.db().audit().stock_history("p-beer").await.unwrap().is_empty());

        let err = engine
            .finalize(&cashier(), FinalizeRequest::paid_with(&sale.id, PaymentMethod::Card))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[tokio::test]
    async fn test_credit_notes_are_cumulative() {
        let engine = seeded_engine().await;
        let (sale_id, item_id) = completed_sale(&engine, "p-beer", 3).await;

        let first = engine.create_note(&manager(), credit(&sale_id, &item_id, 2)).await.unwrap();
        assert_eq!(first.note.ncf, "B0400000001");
        assert_eq!(first.note.original_ncf, "B0100000001");
        assert_eq!(first.note.subtotal_cents, 20000);
        assert_eq!(first.note.tax_cents, 3600);
        assert_eq!(first.note.total_cents, 23600);
        assert_eq!(first.items[0].line_tax_cents, 3600);
        assert_eq!(stock_of(&engine, "p-beer").await, 9);

        let err = engine
            .create_note(&manager(), credit(&sale_id, &item_id, 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::QuantityExceedsSold {
                sold: 3,
                already_credited: 2,
                requested: 2,
                ..
            })
        ));

        engine.create_note(&manager(), credit(&sale_id, &item_id, 1)).await.unwrap();
        assert_eq!(stock_of(&engine, "p-beer").await, 10);

        // Debit notes do not count against credits and move no stock
        let debit = engine
            .create_note(
                &manager(),
                NoteRequest {
                    note_type: NoteType::Debit,
                    ..credit(&sale_id, &item_id, 3)
                },
            )
            .await
            .unwrap();
        assert_eq!(debit.note.ncf, "B0300000001");
        assert_eq!(stock_of(&engine, "p-beer").await, 10);

        let ledger = engine.db().audit().ledger_for_sale(&sale_id).await.unwrap();
        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger.iter().filter(|e| e.credit_note_id.is_some()).count(), 3);
        assert_eq!(engine.notes_for_sale(&sale_id).await.unwrap().len(), 3);

        // Cancelling after full credit returns nothing more
        engine.cancel_sale(&manager(), &sale_id, "anulada").await.unwrap();
        assert_eq!(stock_of(&engine, "p-beer").await, 10);
    }

    #[tokio::test]
    async fn test_cancel_after_partial_credit() {
        let engine = seeded_engine().await;
        let (sale_id, item_id) = completed_sale(&engine, "p-beer", 3).await;
        engine.create_note(&manager(), credit(&sale_id, &item_id, 2)).await.unwrap();

        engine.cancel_sale(&manager(), &sale_id, "anulada").await.unwrap();
        assert_eq!(stock_of(&engine, "p-beer").await, 10);
    }

    #[tokio::test]
    async fn test_note_rules() {
        let engine = seeded_engine().await;
        let (sale_id, item_id) = completed_sale(&engine, "p-wine", 1).await;

        let err = engine
            .create_note(&cashier(), credit(&sale_id, &item_id, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = engine
            .create_note(&manager(), credit(&sale_id, "missing", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine
            .create_note(&manager(), NoteRequest { items: vec![], ..credit(&sale_id, &item_id, 1) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let pending = engine.create_sale(&cashier(), None).await.unwrap();
        let err = engine
            .create_note(&manager(), credit(&pending.id, &item_id, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        // Nothing was allocated by the failures
        let sequences = engine.list_sequences(Some(NcfType::CreditNote)).await.unwrap();
        assert_eq!(sequences[0].current_number, 1);

        let note = engine.create_note(&manager(), credit(&sale_id, &item_id, 1)).await.unwrap();
        // Inclusive price: the frozen 118.00 splits into 100.00 + 18.00
        assert_eq!(note.note.total_cents, 11800);
        assert_eq!(note.note.tax_cents, 1800);
        let fetched = engine.get_note(&note.note.id).await.unwrap();
        assert_eq!(fetched.items.len(), 1);
        assert_eq!(fetched.items[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_note_serie_follows_electronic_parent() {
        let engine = seeded_engine().await;
        engine
            .create_sequence(
                &admin(),
                NewSequence {
                    ncf_type: NcfType::Government,
                    serie: "E45".to_string(),
                    start_number: 1,
                    end_number: 100,
                    description: None,
                    active: true,
                },
            )
            .await
            .unwrap();

        let sale = engine.create_sale(&cashier(), None).await.unwrap();
        let details = engine.add_item(&cashier(), &sale.id, "p-beer", 1).await.unwrap();
        engine
            .set_customer(&cashier(), &sale.id, Some("Ministerio"), Some("401500625"))
            .await
            .unwrap();
        let receipt = engine
            .finalize(
                &cashier(),
                FinalizeRequest::paid_with(&sale.id, PaymentMethod::Transfer)
                    .with_ncf_type(NcfType::Government),
            )
            .await
            .unwrap();
        assert_eq!(receipt.ncf, "E4500000001");

        let note = engine
            .create_note(&manager(), credit(&sale.id, &details.items[0].id, 1))
            .await
            .unwrap();
        assert_eq!(note.note.ncf, "E0400000001");
        assert_eq!(note.note.customer_rnc.as_deref(), Some("401500625"));
    }

    #[tokio::test]
    async fn test_export_views_after_cancel_and_note() {
        let engine = seeded_engine().await;
        let from = Utc::now() - chrono::Duration::hours(1);
        let (first, _) = completed_sale(&engine, "p-beer", 1).await;
        let (second, item) = completed_sale(&engine, "p-beer", 2).await;
        engine.cancel_sale(&cashier(), &first, "anulada").await.unwrap();
        engine
            .create_note(&manager(), credit(&second, &item, 1))
            .await
            .unwrap();

        let b01 = engine
            .list_sequences(Some(NcfType::FinalConsumer))
            .await
            .unwrap()
            .remove(0);
        let report = engine.db().audit().sequence_audit(&b01.id).await.unwrap();
        assert_eq!(report.issued, vec![1, 2]);
        assert_eq!(report.cancelled, vec!["B0100000001".to_string()]);
        assert!(report.missing.is_empty());
        assert_eq!(report.current_number, 3);

        let ledger = engine.db().audit().ledger_for_sequence(&b01.id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1].sale_id.as_deref(), Some(second.as_str()));

        let documents = engine
            .db()
            .audit()
            .fiscal_documents(from, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(documents.len(), 3);
        let cancelled = documents.iter().find(|d| d.ncf == "B0100000001").unwrap();
        assert!(cancelled.cancelled);
        let note = documents
            .iter()
            .find(|d| d.ncf_type == NcfType::CreditNote)
            .unwrap();
        assert_eq!(note.modified_ncf.as_deref(), Some("B0100000002"));
        assert!(!note.cancelled);
    }
}
