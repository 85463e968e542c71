//! # Audit Trail
//!
//! Append-only records proving the fate of every fiscal number and every
//! stock unit.
//!
//! ## Tables
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ncf_ledger          one row per issued NCF (sale or note)             │
//! │  cancelled_ncfs      one row per retired NCF                           │
//! │  ncf_sequence_audit  before/after snapshot of every sequence edit      │
//! │  stock_adjustments   old / delta / new of every stock write            │
//! │                                                                         │
//! │  INSERT ✓    UPDATE ✗ (trigger)    DELETE ✗ (trigger)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writers take the caller's transaction connection so a record exists
//! exactly when the change it describes commits.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use fiscal_core::{
    CancelledNcf, FiscalDocument, NcfLedgerEntry, SequenceAuditEntry, SequenceAuditReport,
    StockAdjustment,
};

const LEDGER_COLUMNS: &str = r#"
    id, sequence_id, ncf_type, serie, number, ncf, sale_id, credit_note_id,
    issued_by, cash_register_id, issued_at
"#;

const STOCK_COLUMNS: &str = r#"
    id, product_id, cause, old_stock, delta, new_stock, reason, reference_id,
    actor_id, created_at
"#;

/// Reads and appends the audit tables.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    pool: SqlitePool,
}

impl AuditTrail {
    /// Creates a new AuditTrail.
    pub fn new(pool: SqlitePool) -> Self {
        AuditTrail { pool }
    }

    // =========================================================================
    // Appends (in-transaction)
    // =========================================================================

    /// Records an issued NCF.
    pub async fn record_issued(conn: &mut SqliteConnection, entry: &NcfLedgerEntry) -> DbResult<()> {
        debug!(ncf = %entry.ncf, sequence_id = %entry.sequence_id, "Appending NCF ledger entry");

        sqlx::query(
            r#"
            INSERT INTO ncf_ledger (
                id, sequence_id, ncf_type, serie, number, ncf, sale_id, credit_note_id,
                issued_by, cash_register_id, issued_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.sequence_id)
        .bind(entry.ncf_type)
        .bind(&entry.serie)
        .bind(entry.number)
        .bind(&entry.ncf)
        .bind(&entry.sale_id)
        .bind(&entry.credit_note_id)
        .bind(&entry.issued_by)
        .bind(&entry.cash_register_id)
        .bind(entry.issued_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Records a retired NCF.
    pub async fn record_cancelled(conn: &mut SqliteConnection, entry: &CancelledNcf) -> DbResult<()> {
        debug!(ncf = %entry.ncf, sale_id = %entry.sale_id, "Appending cancelled NCF");

        sqlx::query(
            r#"
            INSERT INTO cancelled_ncfs (id, ncf, ncf_type, sale_id, reason, cancelled_by, cancelled_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.ncf)
        .bind(entry.ncf_type)
        .bind(&entry.sale_id)
        .bind(&entry.reason)
        .bind(&entry.cancelled_by)
        .bind(entry.cancelled_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Records a sequence edit.
    pub async fn record_sequence_change(
        conn: &mut SqliteConnection,
        entry: &SequenceAuditEntry,
    ) -> DbResult<()> {
        debug!(sequence_id = %entry.sequence_id, action = ?entry.action, "Appending sequence audit");

        sqlx::query(
            r#"
            INSERT INTO ncf_sequence_audit (id, sequence_id, action, actor_id, before_json, after_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.sequence_id)
        .bind(entry.action)
        .bind(&entry.actor_id)
        .bind(&entry.before_json)
        .bind(&entry.after_json)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Records a stock write.
    pub async fn record_stock(conn: &mut SqliteConnection, entry: &StockAdjustment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (
                id, product_id, cause, old_stock, delta, new_stock, reason, reference_id,
                actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.product_id)
        .bind(entry.cause)
        .bind(entry.old_stock)
        .bind(entry.delta)
        .bind(entry.new_stock)
        .bind(&entry.reason)
        .bind(&entry.reference_id)
        .bind(&entry.actor_id)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Ledger rows of a sale and of the notes issued against it.
    pub async fn ledger_for_sale(&self, sale_id: &str) -> DbResult<Vec<NcfLedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {} FROM ncf_ledger
            WHERE sale_id = ?1
               OR credit_note_id IN (SELECT id FROM credit_notes WHERE original_sale_id = ?1)
            ORDER BY issued_at, number
            "#,
            LEDGER_COLUMNS
        );
        let rows = sqlx::query_as::<_, NcfLedgerEntry>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Ledger rows of one sequence, by number.
    pub async fn ledger_for_sequence(&self, sequence_id: &str) -> DbResult<Vec<NcfLedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ncf_ledger WHERE sequence_id = ?1 ORDER BY number",
            LEDGER_COLUMNS
        );
        let rows = sqlx::query_as::<_, NcfLedgerEntry>(&sql)
            .bind(sequence_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Cancellation record of an NCF, if retired.
    pub async fn cancelled_ncf(&self, ncf: &str) -> DbResult<Option<CancelledNcf>> {
        let row = sqlx::query_as::<_, CancelledNcf>(
            r#"
            SELECT id, ncf, ncf_type, sale_id, reason, cancelled_by, cancelled_at
            FROM cancelled_ncfs WHERE ncf = ?1
            "#,
        )
        .bind(ncf)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Stock movements of a product, oldest first.
    pub async fn stock_history(&self, product_id: &str) -> DbResult<Vec<StockAdjustment>> {
        let sql = format!(
            "SELECT {} FROM stock_adjustments WHERE product_id = ?1 ORDER BY created_at, rowid",
            STOCK_COLUMNS
        );
        let rows = sqlx::query_as::<_, StockAdjustment>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Edit history of a sequence, oldest first.
    pub async fn sequence_history(&self, sequence_id: &str) -> DbResult<Vec<SequenceAuditEntry>> {
        let rows = sqlx::query_as::<_, SequenceAuditEntry>(
            r#"
            SELECT id, sequence_id, action, actor_id, before_json, after_json, created_at
            FROM ncf_sequence_audit WHERE sequence_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Issued, cancelled and missing numbers of a sequence.
    ///
    /// ## Report
    /// ```text
    /// start ─────────────────────────── current (next to issue)
    ///   │ issued: numbers with a ledger row                │
    ///   │ cancelled: issued NCFs later retired             │
    ///   │ missing: numbers in [start, current) with no row │
    /// ```
    /// `missing` stays empty as long as every allocation went through the
    /// allocator, which writes the ledger in the same transaction.
    pub async fn sequence_audit(&self, sequence_id: &str) -> DbResult<SequenceAuditReport> {
        let (serie, start_number, current_number): (String, i64, i64) = sqlx::query_as(
            "SELECT serie, start_number, current_number FROM ncf_sequences WHERE id = ?1",
        )
        .bind(sequence_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("NcfSequence", sequence_id))?;

        let issued: Vec<i64> =
            sqlx::query_scalar("SELECT number FROM ncf_ledger WHERE sequence_id = ?1 ORDER BY number")
                .bind(sequence_id)
                .fetch_all(&self.pool)
                .await?;

        let cancelled: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.ncf FROM cancelled_ncfs c
            JOIN ncf_ledger l ON l.ncf = c.ncf
            WHERE l.sequence_id = ?1
            ORDER BY l.number
            "#,
        )
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;

        let seen: BTreeSet<i64> = issued.iter().copied().collect();
        let missing = (start_number..current_number)
            .filter(|n| !seen.contains(n))
            .collect();

        Ok(SequenceAuditReport {
            sequence_id: sequence_id.to_string(),
            serie,
            start_number,
            current_number,
            issued,
            cancelled,
            missing,
        })
    }

    /// Fiscal documents issued in `[from, to)`: completed or cancelled sales
    /// carrying an NCF, plus credit and debit notes.
    pub async fn fiscal_documents(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<FiscalDocument>> {
        let rows = sqlx::query_as::<_, FiscalDocument>(
            r#"
            SELECT s.ncf AS ncf,
                   s.ncf_type AS ncf_type,
                   s.id AS document_id,
                   NULL AS modified_ncf,
                   s.completed_at AS issued_at,
                   s.subtotal_cents AS subtotal_cents,
                   s.tax_cents AS tax_cents,
                   s.total_cents AS total_cents,
                   s.customer_name AS customer_name,
                   s.customer_rnc AS customer_rnc,
                   (s.status = 'cancelled') AS cancelled
            FROM sales s
            WHERE s.ncf IS NOT NULL AND s.completed_at >= ?1 AND s.completed_at < ?2
            UNION ALL
            SELECT n.ncf,
                   CASE n.note_type WHEN 'credit' THEN 'nota_credito' ELSE 'nota_debito' END,
                   n.id,
                   n.original_ncf,
                   n.created_at,
                   n.subtotal_cents,
                   n.tax_cents,
                   n.total_cents,
                   n.customer_name,
                   n.customer_rnc,
                   0
            FROM credit_notes n
            WHERE n.created_at >= ?1 AND n.created_at < ?2
            ORDER BY issued_at, ncf
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::ProductRepository;
    use fiscal_core::{Product, ProductKind, StockCause};

    #[tokio::test]
    async fn test_stock_adjustments_are_append_only() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.products()
            .insert(&Product {
                id: "p-1".to_string(),
                name: "Agua 500ml".to_string(),
                category_id: None,
                price_cents: 2500,
                stock: 10,
                kind: ProductKind::Inventory,
                tax_rate_bps: None,
                tax_included: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        ProductRepository::set_stock(&mut conn, "p-1", 7, now).await.unwrap();
        AuditTrail::record_stock(
            &mut conn,
            &StockAdjustment {
                id: "a-1".to_string(),
                product_id: "p-1".to_string(),
                cause: StockCause::Manual,
                old_stock: 10,
                delta: -3,
                new_stock: 7,
                reason: Some("rotura".to_string()),
                reference_id: None,
                actor_id: "u-manager".to_string(),
                created_at: now,
            },
        )
        .await
        .unwrap();

        let update = sqlx::query("UPDATE stock_adjustments SET delta = 0 WHERE id = 'a-1'")
            .execute(&mut *conn)
            .await
            .map_err(DbError::from);
        assert!(matches!(update, Err(DbError::ConstraintViolation { .. })));

        let delete = sqlx::query("DELETE FROM stock_adjustments")
            .execute(&mut *conn)
            .await
            .map_err(DbError::from);
        assert!(matches!(delete, Err(DbError::ConstraintViolation { .. })));
        drop(conn);

        let history = db.audit().stock_history("p-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cause, StockCause::Manual);
        assert_eq!(history[0].new_stock, 7);
    }

    #[tokio::test]
    async fn test_sequence_audit_unknown_sequence() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db.audit().sequence_audit("nope").await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }
}
