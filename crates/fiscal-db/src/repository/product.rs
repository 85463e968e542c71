//! # Product Repository
//!
//! Catalog read model: products and categories.
//!
//! The catalog is owned by the inventory collaborator. The engine reads
//! price and tax classification from it and mutates one column, `stock`,
//! inside a write transaction.
//!
//! ## Stock Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN IMMEDIATE                                                        │
//! │     │                                                                   │
//! │     ├── fetch(conn, id)           read stock under the write lock      │
//! │     ├── set_stock(conn, id, n)    absolute value, computed by caller   │
//! │     └── AuditTrail::record_stock  old / delta / new                     │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use fiscal_core::{Category, Product};

const PRODUCT_COLUMNS: &str = r#"
    id, name, category_id, price_cents, stock, kind,
    tax_rate_bps, tax_included, is_active, created_at, updated_at
"#;

/// Repository for catalog reads.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Gets a category by ID.
    pub async fn get_category(&self, id: &str) -> DbResult<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_category(&mut conn, id).await
    }

    /// Inserts a product (seeding and tests; the catalog itself is external).
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, category_id, price_cents, stock, kind,
                tax_rate_bps, tax_included, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.category_id)
        .bind(product.price_cents)
        .bind(product.stock)
        .bind(product.kind)
        .bind(product.tax_rate_bps)
        .bind(product.tax_included)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a category.
    pub async fn insert_category(&self, category: &Category) -> DbResult<()> {
        debug!(id = %category.id, name = %category.name, "Inserting category");

        sqlx::query(
            "INSERT INTO categories (id, name, tax_rate_bps, tax_included) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(category.tax_rate_bps)
        .bind(category.tax_included)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // In-transaction operations
    // =========================================================================

    /// Reads a product on the given connection.
    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(product)
    }

    /// Reads a category on the given connection.
    pub async fn fetch_category(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "SELECT id, name, tax_rate_bps, tax_included FROM categories WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(category)
    }

    /// Writes an absolute stock value.
    pub async fn set_stock(
        conn: &mut SqliteConnection,
        id: &str,
        stock: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(id = %id, stock, "Setting stock");

        let result = sqlx::query("UPDATE products SET stock = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(stock)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use fiscal_core::{ProductKind, TaxClass};

    fn product(id: &str, category_id: Option<&str>, tax_rate_bps: Option<u32>) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            name: "Presidente 650ml".to_string(),
            category_id: category_id.map(str::to_string),
            price_cents: 15000,
            stock: 24,
            kind: ProductKind::Inventory,
            tax_rate_bps,
            tax_included: tax_rate_bps.map(|_| false),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_with_category() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();

        repo.insert_category(&Category {
            id: "c-bebidas".to_string(),
            name: "Bebidas".to_string(),
            tax_rate_bps: Some(1600),
            tax_included: Some(false),
        })
        .await
        .unwrap();
        repo.insert(&product("p-1", Some("c-bebidas"), None))
            .await
            .unwrap();

        let loaded = repo.get_by_id("p-1").await.unwrap().unwrap();
        assert_eq!(loaded.kind, ProductKind::Inventory);
        assert_eq!(loaded.tax_rate_bps, None);

        let category = repo.get_category("c-bebidas").await.unwrap();
        let class = TaxClass::resolve(&loaded, category.as_ref());
        assert_eq!(class.rate.bps(), 1600);
        assert!(!class.included);

        assert!(repo.get_by_id("missing").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_stock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products().insert(&product("p-1", None, Some(1800))).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        ProductRepository::set_stock(&mut conn, "p-1", 20, Utc::now())
            .await
            .unwrap();
        let err = ProductRepository::set_stock(&mut conn, "nope", 1, Utc::now()).await;
        assert!(matches!(err, Err(DbError::NotFound { .. })));
        drop(conn);

        let loaded = db.products().get_by_id("p-1").await.unwrap().unwrap();
        assert_eq!(loaded.stock, 20);
    }
}
