//! # Note Repository
//!
//! Credit and debit notes issued against completed sales.

use std::collections::HashMap;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use fiscal_core::{CreditNote, CreditNoteItem};

const NOTE_COLUMNS: &str = r#"
    id, note_type, original_sale_id, original_ncf, ncf, ncf_sequence_id, reason,
    subtotal_cents, tax_cents, total_cents, customer_name, customer_rnc,
    created_by, created_at
"#;

const NOTE_ITEM_COLUMNS: &str = r#"
    id, credit_note_id, sale_item_id, product_id, quantity, unit_price_cents,
    tax_rate_bps, tax_included, line_total_cents, line_tax_cents
"#;

/// Repository for credit/debit notes.
#[derive(Debug, Clone)]
pub struct NoteRepository {
    pool: SqlitePool,
}

impl NoteRepository {
    /// Creates a new NoteRepository.
    pub fn new(pool: SqlitePool) -> Self {
        NoteRepository { pool }
    }

    /// Gets a note by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CreditNote>> {
        let sql = format!("SELECT {} FROM credit_notes WHERE id = ?1", NOTE_COLUMNS);
        let note = sqlx::query_as::<_, CreditNote>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(note)
    }

    /// Notes issued against a sale, oldest first.
    pub async fn list_for_sale(&self, sale_id: &str) -> DbResult<Vec<CreditNote>> {
        let sql = format!(
            "SELECT {} FROM credit_notes WHERE original_sale_id = ?1 ORDER BY created_at, id",
            NOTE_COLUMNS
        );
        let notes = sqlx::query_as::<_, CreditNote>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(notes)
    }

    /// Lines of a note.
    pub async fn get_items(&self, note_id: &str) -> DbResult<Vec<CreditNoteItem>> {
        let sql = format!(
            "SELECT {} FROM credit_note_items WHERE credit_note_id = ?1 ORDER BY id",
            NOTE_ITEM_COLUMNS
        );
        let items = sqlx::query_as::<_, CreditNoteItem>(&sql)
            .bind(note_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    // =========================================================================
    // In-transaction operations
    // =========================================================================

    /// Inserts a note header.
    pub async fn insert(conn: &mut SqliteConnection, note: &CreditNote) -> DbResult<()> {
        debug!(id = %note.id, ncf = %note.ncf, sale_id = %note.original_sale_id, "Inserting note");

        sqlx::query(
            r#"
            INSERT INTO credit_notes (
                id, note_type, original_sale_id, original_ncf, ncf, ncf_sequence_id, reason,
                subtotal_cents, tax_cents, total_cents, customer_name, customer_rnc,
                created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&note.id)
        .bind(note.note_type)
        .bind(&note.original_sale_id)
        .bind(&note.original_ncf)
        .bind(&note.ncf)
        .bind(&note.ncf_sequence_id)
        .bind(&note.reason)
        .bind(note.subtotal_cents)
        .bind(note.tax_cents)
        .bind(note.total_cents)
        .bind(&note.customer_name)
        .bind(&note.customer_rnc)
        .bind(&note.created_by)
        .bind(note.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a note line.
    pub async fn insert_item(conn: &mut SqliteConnection, item: &CreditNoteItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_note_items (
                id, credit_note_id, sale_item_id, product_id, quantity, unit_price_cents,
                tax_rate_bps, tax_included, line_total_cents, line_tax_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&item.id)
        .bind(&item.credit_note_id)
        .bind(&item.sale_item_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.tax_rate_bps)
        .bind(item.tax_included)
        .bind(item.line_total_cents)
        .bind(item.line_tax_cents)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Quantity already credited per sale item, over every credit note of
    /// the sale. Debit notes do not count.
    pub async fn credited_quantities(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT i.sale_item_id, SUM(i.quantity)
            FROM credit_note_items i
            JOIN credit_notes n ON n.id = i.credit_note_id
            WHERE n.original_sale_id = ?1 AND n.note_type = 'credit'
            GROUP BY i.sale_item_id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
