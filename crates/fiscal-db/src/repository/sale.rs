//! # Sale Repository
//!
//! Database operations for sales and sale items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE                                                             │
//! │     └── insert() → Sale { status: Pending, totals: 0 }                 │
//! │                                                                         │
//! │  2. EDIT (pending only)                                                │
//! │     └── insert_item() / update_item_quantity() / delete_item()         │
//! │     └── update_totals() → running subtotal, tax, service, total        │
//! │                                                                         │
//! │  3. FINALIZE                                                           │
//! │     └── mark_completed() → Sale { status: Completed, ncf }             │
//! │                                                                         │
//! │  4. (OPTIONAL) CANCEL                                                  │
//! │     └── mark_cancelled() → Sale { status: Cancelled } (keeps ncf)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every status-changing UPDATE carries its expected status in the WHERE
//! clause; zero affected rows means the sale moved under us.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use fiscal_core::{NcfType, PaymentMethod, Sale, SaleItem, TaxBreakdown};

const SALE_COLUMNS: &str = r#"
    id, status, table_id, cash_register_id, created_by,
    customer_name, customer_rnc, apply_service_charge,
    subtotal_cents, tax_cents, service_charge_cents, total_cents,
    ncf, ncf_type, ncf_sequence_id, payment_method,
    cash_received_cents, change_cents, finalized_by,
    cancellation_reason, cancelled_by, cancelled_at,
    created_at, updated_at, completed_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, sale_id, product_id, name_snapshot, unit_price_cents, quantity,
    tax_rate_bps, tax_included, created_at
"#;

/// Fields written when a sale completes.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub ncf: &'a str,
    pub ncf_type: NcfType,
    pub sequence_id: &'a str,
    pub payment_method: PaymentMethod,
    pub cash_received_cents: Option<i64>,
    pub change_cents: Option<i64>,
    pub finalized_by: &'a str,
    pub totals: TaxBreakdown,
    pub completed_at: DateTime<Utc>,
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Gets all items for a sale, in insertion order.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_items(&mut conn, sale_id).await
    }

    // =========================================================================
    // In-transaction operations
    // =========================================================================

    /// Inserts a new sale row.
    pub async fn insert(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, created_by = %sale.created_by, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, status, table_id, cash_register_id, created_by,
                customer_name, customer_rnc, apply_service_charge,
                subtotal_cents, tax_cents, service_charge_cents, total_cents,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&sale.id)
        .bind(sale.status)
        .bind(&sale.table_id)
        .bind(&sale.cash_register_id)
        .bind(&sale.created_by)
        .bind(&sale.customer_name)
        .bind(&sale.customer_rnc)
        .bind(sale.apply_service_charge)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.service_charge_cents)
        .bind(sale.total_cents)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Reads a sale on the given connection.
    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(sale)
    }

    /// Reads the items of a sale.
    pub async fn fetch_items(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at, id",
            ITEM_COLUMNS
        );
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(items)
    }

    /// Finds the line already holding a product, if any.
    pub async fn find_item_by_product(
        conn: &mut SqliteConnection,
        sale_id: &str,
        product_id: &str,
    ) -> DbResult<Option<SaleItem>> {
        let sql = format!(
            "SELECT {} FROM sale_items WHERE sale_id = ?1 AND product_id = ?2",
            ITEM_COLUMNS
        );
        let item = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(item)
    }

    /// Inserts a line item.
    pub async fn insert_item(conn: &mut SqliteConnection, item: &SaleItem) -> DbResult<()> {
        debug!(sale_id = %item.sale_id, product_id = %item.product_id, qty = item.quantity, "Adding item");

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, name_snapshot, unit_price_cents, quantity,
                tax_rate_bps, tax_included, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.name_snapshot)
        .bind(item.unit_price_cents)
        .bind(item.quantity)
        .bind(item.tax_rate_bps)
        .bind(item.tax_included)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Sets a line's quantity.
    pub async fn update_item_quantity(
        conn: &mut SqliteConnection,
        item_id: &str,
        quantity: i64,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE sale_items SET quantity = ?2 WHERE id = ?1")
            .bind(item_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SaleItem", item_id));
        }
        Ok(())
    }

    /// Removes a line.
    pub async fn delete_item(conn: &mut SqliteConnection, item_id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM sale_items WHERE id = ?1")
            .bind(item_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SaleItem", item_id));
        }
        Ok(())
    }

    /// Stores running totals on a pending sale.
    pub async fn update_totals(
        conn: &mut SqliteConnection,
        sale_id: &str,
        totals: &TaxBreakdown,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(sale_id = %sale_id, total = %totals.total, "Updating sale totals");

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET subtotal_cents = ?2, tax_cents = ?3, service_charge_cents = ?4,
                total_cents = ?5, updated_at = ?6
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(totals.subtotal.cents())
        .bind(totals.tax_amount.cents())
        .bind(totals.service_charge.cents())
        .bind(totals.total.cents())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        pending_guard(result.rows_affected(), sale_id)
    }

    /// Sets customer identification on a pending sale.
    pub async fn set_customer(
        conn: &mut SqliteConnection,
        sale_id: &str,
        name: Option<&str>,
        rnc: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET customer_name = ?2, customer_rnc = ?3, updated_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(name)
        .bind(rnc)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        pending_guard(result.rows_affected(), sale_id)
    }

    /// Toggles the service charge on a pending sale.
    pub async fn set_service_charge(
        conn: &mut SqliteConnection,
        sale_id: &str,
        apply: bool,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET apply_service_charge = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(apply)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        pending_guard(result.rows_affected(), sale_id)
    }

    /// Binds a cash register to a pending sale that has none.
    pub async fn bind_register(
        conn: &mut SqliteConnection,
        sale_id: &str,
        register_id: &str,
    ) -> DbResult<()> {
        debug!(sale_id = %sale_id, register_id = %register_id, "Binding cash register");

        sqlx::query(
            r#"
            UPDATE sales SET cash_register_id = ?2
            WHERE id = ?1 AND status = 'pending' AND cash_register_id IS NULL
            "#,
        )
        .bind(sale_id)
        .bind(register_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Transitions pending → completed with the fiscal fields.
    pub async fn mark_completed(
        conn: &mut SqliteConnection,
        sale_id: &str,
        completion: &Completion<'_>,
    ) -> DbResult<()> {
        debug!(sale_id = %sale_id, ncf = %completion.ncf, "Completing sale");

        let totals = &completion.totals;
        let result = sqlx::query(
            r#"
            UPDATE sales
            SET status = 'completed',
                subtotal_cents = ?2, tax_cents = ?3, service_charge_cents = ?4, total_cents = ?5,
                ncf = ?6, ncf_type = ?7, ncf_sequence_id = ?8,
                payment_method = ?9, cash_received_cents = ?10, change_cents = ?11,
                finalized_by = ?12, completed_at = ?13, updated_at = ?13
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(totals.subtotal.cents())
        .bind(totals.tax_amount.cents())
        .bind(totals.service_charge.cents())
        .bind(totals.total.cents())
        .bind(completion.ncf)
        .bind(completion.ncf_type)
        .bind(completion.sequence_id)
        .bind(completion.payment_method)
        .bind(completion.cash_received_cents)
        .bind(completion.change_cents)
        .bind(completion.finalized_by)
        .bind(completion.completed_at)
        .execute(&mut *conn)
        .await?;

        pending_guard(result.rows_affected(), sale_id)
    }

    /// Transitions pending/completed → cancelled. The ncf, if any, stays.
    pub async fn mark_cancelled(
        conn: &mut SqliteConnection,
        sale_id: &str,
        reason: &str,
        cancelled_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(sale_id = %sale_id, "Cancelling sale");

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET status = 'cancelled', cancellation_reason = ?2, cancelled_by = ?3,
                cancelled_at = ?4, updated_at = ?4
            WHERE id = ?1 AND status IN ('pending', 'completed')
            "#,
        )
        .bind(sale_id)
        .bind(reason)
        .bind(cancelled_by)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::ConstraintViolation {
                message: format!("sale {} is not cancellable", sale_id),
            });
        }
        Ok(())
    }
}

fn pending_guard(rows_affected: u64, sale_id: &str) -> DbResult<()> {
    if rows_affected == 0 {
        return Err(DbError::ConstraintViolation {
            message: format!("sale {} is no longer pending", sale_id),
        });
    }
    Ok(())
}
