//! # Stock Ledger
//!
//! Every stock write goes through [`StockLedger::apply`], which writes the
//! new value and its audit row on the same connection.
//!
//! ```text
//! finalize        → apply(-qty, Sale)
//! cancel          → apply(+qty, SaleCancelled)
//! credit note     → apply(+qty, CreditNote)
//! adjust_stock    → apply(±n,   Manual)
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::info;

use super::{new_id, op_span, traced, FiscalEngine};
use crate::error::{DbError, DbResult, ServiceResult};
use crate::repository::audit::AuditTrail;
use crate::repository::product::ProductRepository;
use crate::retry::with_lock_retry;
use fiscal_core::validation::validate_reason;
use fiscal_core::{
    Actor, Capability, CoreError, Product, StockAdjustment, StockCause, ValidationError,
};

/// Writes stock and its audit trail together.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockLedger;

/// One stock movement to apply.
#[derive(Debug, Clone, Copy)]
pub struct StockMove<'a> {
    pub delta: i64,
    pub cause: StockCause,
    pub reference_id: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub actor_id: &'a str,
}

impl StockLedger {
    /// Applies a movement to a product read under the current write lock.
    pub async fn apply(
        conn: &mut SqliteConnection,
        product: &Product,
        movement: StockMove<'_>,
        now: DateTime<Utc>,
    ) -> DbResult<StockAdjustment> {
        let new_stock = product.stock + movement.delta;
        ProductRepository::set_stock(conn, &product.id, new_stock, now).await?;

        let adjustment = StockAdjustment {
            id: new_id(),
            product_id: product.id.clone(),
            cause: movement.cause,
            old_stock: product.stock,
            delta: movement.delta,
            new_stock,
            reason: movement.reason.map(str::to_string),
            reference_id: movement.reference_id.map(str::to_string),
            actor_id: movement.actor_id.to_string(),
            created_at: now,
        };
        AuditTrail::record_stock(conn, &adjustment).await?;

        Ok(adjustment)
    }
}

impl FiscalEngine {
    /// Manual stock correction (breakage, recount, delivery).
    ///
    /// ## Errors
    /// - `PermissionDenied` without `AdjustStock`
    /// - `Validation` for a zero delta or empty reason
    /// - `InsufficientStock` when a stock-tracked product would go negative
    pub async fn adjust_stock(
        &self,
        actor: &Actor,
        product_id: &str,
        delta: i64,
        reason: &str,
    ) -> ServiceResult<StockAdjustment> {
        traced(op_span("adjust_stock", actor, product_id), async {
            actor.authorize(Capability::AdjustStock)?;
            if delta == 0 {
                return Err(CoreError::from(ValidationError::InvalidFormat {
                    field: "delta".to_string(),
                    reason: "must not be zero".to_string(),
                })
                .into());
            }
            let reason = validate_reason(reason).map_err(CoreError::from)?;
            let reason = reason.as_str();

            with_lock_retry(self.retry, "adjust_stock", move || {
                self.adjust_stock_once(actor, product_id, delta, reason)
            })
            .await
        })
        .await
    }

    async fn adjust_stock_once(
        &self,
        actor: &Actor,
        product_id: &str,
        delta: i64,
        reason: &str,
    ) -> ServiceResult<StockAdjustment> {
        let mut tx = self.db.begin_immediate().await?;

        let product = ProductRepository::fetch(&mut tx, product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", product_id))?;
        if product.kind.tracks_stock() && product.stock + delta < 0 {
            return Err(product.shortage(-delta).into());
        }

        let adjustment = StockLedger::apply(
            &mut tx,
            &product,
            StockMove {
                delta,
                cause: StockCause::Manual,
                reference_id: None,
                reason: Some(reason),
                actor_id: &actor.user_id,
            },
            Utc::now(),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(
            product_id = %product_id,
            old = adjustment.old_stock,
            new = adjustment.new_stock,
            "Stock adjusted"
        );
        Ok(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::ServiceError;

    #[tokio::test]
    async fn test_manual_adjustment_is_audited() {
        let engine = seeded_engine().await;

        let adj = engine
            .adjust_stock(&manager(), "p-beer", -4, "rotura en almacén")
            .await
            .unwrap();
        assert_eq!((adj.old_stock, adj.delta, adj.new_stock), (10, -4, 6));
        assert_eq!(stock_of(&engine, "p-beer").await, 6);

        let history = engine.db().audit().stock_history("p-beer").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason.as_deref(), Some("rotura en almacén"));
    }

    #[tokio::test]
    async fn test_adjustment_rules() {
        let engine = seeded_engine().await;

        let denied = engine.adjust_stock(&cashier(), "p-beer", 1, "conteo").await;
        assert!(matches!(
            denied,
            Err(ServiceError::Core(CoreError::PermissionDenied { .. }))
        ));

        let negative = engine.adjust_stock(&manager(), "p-wine", -4, "conteo").await;
        assert!(matches!(
            negative,
            Err(ServiceError::Core(CoreError::InsufficientStock { available: 3, .. }))
        ));

        let zero = engine.adjust_stock(&manager(), "p-wine", 0, "conteo").await;
        assert!(matches!(zero, Err(ServiceError::Core(CoreError::Validation(_)))));

        let blank = engine.adjust_stock(&manager(), "p-wine", 1, "   ").await;
        assert!(matches!(blank, Err(ServiceError::Core(CoreError::Validation(_)))));

        assert_eq!(stock_of(&engine, "p-wine").await, 3);
    }
}
