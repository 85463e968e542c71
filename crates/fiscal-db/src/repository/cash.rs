//! # Cash Register Repository
//!
//! Registers and cash drawer sessions. Finalize reads them to bind a sale to
//! the cashier's register and to require an open session for cash payments.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use fiscal_core::{CashRegister, CashSession, SessionStatus};

const SESSION_COLUMNS: &str =
    "id, cash_register_id, opened_by, opening_cents, status, opened_at, closed_at";

/// Repository for cash registers and sessions.
#[derive(Debug, Clone)]
pub struct CashRepository {
    pool: SqlitePool,
}

impl CashRepository {
    /// Creates a new CashRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CashRepository { pool }
    }

    /// Inserts a register.
    pub async fn insert_register(&self, register: &CashRegister) -> DbResult<()> {
        debug!(id = %register.id, name = %register.name, "Inserting cash register");

        sqlx::query("INSERT INTO cash_registers (id, name, user_id, is_active) VALUES (?1, ?2, ?3, ?4)")
            .bind(&register.id)
            .bind(&register.name)
            .bind(&register.user_id)
            .bind(register.is_active)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Opens a session on a register.
    ///
    /// ## Errors
    /// `UniqueViolation` when the register already has an open session.
    pub async fn open_session(
        &self,
        register_id: &str,
        opened_by: &str,
        opening_cents: i64,
    ) -> DbResult<CashSession> {
        let session = CashSession {
            id: Uuid::new_v4().to_string(),
            cash_register_id: register_id.to_string(),
            opened_by: opened_by.to_string(),
            opening_cents,
            status: SessionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_sessions (id, cash_register_id, opened_by, opening_cents, status, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&session.id)
        .bind(&session.cash_register_id)
        .bind(&session.opened_by)
        .bind(session.opening_cents)
        .bind(session.status)
        .bind(session.opened_at)
        .execute(&self.pool)
        .await?;

        info!(session_id = %session.id, register_id = %register_id, "Cash session opened");
        Ok(session)
    }

    /// Closes an open session.
    pub async fn close_session(&self, session_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE cash_sessions SET status = 'closed', closed_at = ?2 WHERE id = ?1 AND status = 'open'",
        )
        .bind(session_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("open CashSession", session_id));
        }

        info!(session_id = %session_id, "Cash session closed");
        Ok(())
    }

    /// The open session of a register, if any.
    pub async fn get_open_session(&self, register_id: &str) -> DbResult<Option<CashSession>> {
        let mut conn = self.pool.acquire().await?;
        Self::open_session_for(&mut conn, register_id).await
    }

    // =========================================================================
    // In-transaction operations
    // =========================================================================

    /// The active register bound to a user, if any.
    pub async fn active_register_for_user(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> DbResult<Option<CashRegister>> {
        let register = sqlx::query_as::<_, CashRegister>(
            r#"
            SELECT id, name, user_id, is_active FROM cash_registers
            WHERE user_id = ?1 AND is_active = 1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(register)
    }

    /// The open session of a register, on the given connection.
    pub async fn open_session_for(
        conn: &mut SqliteConnection,
        register_id: &str,
    ) -> DbResult<Option<CashSession>> {
        let sql = format!(
            "SELECT {} FROM cash_sessions WHERE cash_register_id = ?1 AND status = 'open'",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, CashSession>(&sql)
            .bind(register_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_one_open_session_per_register() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cash = db.cash();

        cash.insert_register(&CashRegister {
            id: "r-1".to_string(),
            name: "Caja 1".to_string(),
            user_id: Some("u-cashier".to_string()),
            is_active: true,
        })
        .await
        .unwrap();

        let session = cash.open_session("r-1", "u-cashier", 500000).await.unwrap();
        let second = cash.open_session("r-1", "u-cashier", 0).await;
        assert!(matches!(second, Err(DbError::UniqueViolation { .. })));

        let open = cash.get_open_session("r-1").await.unwrap().unwrap();
        assert_eq!(open.id, session.id);
        assert_eq!(open.status, SessionStatus::Open);

        cash.close_session(&session.id).await.unwrap();
        assert!(cash.get_open_session("r-1").await.unwrap().is_none());
        assert!(cash.close_session(&session.id).await.is_err());

        // A new session can be opened after closing
        cash.open_session("r-1", "u-cashier", 0).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let register = CashRepository::active_register_for_user(&mut conn, "u-cashier")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(register.id, "r-1");
        assert!(CashRepository::active_register_for_user(&mut conn, "u-other")
            .await
            .unwrap()
            .is_none());
    }
}
