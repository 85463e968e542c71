//! # NCF Sequence Repository
//!
//! Storage for authorized fiscal number ranges. The counter lives only in
//! the `current_number` column; nothing caches it.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use fiscal_core::{NcfSequence, NcfType};

const SEQUENCE_COLUMNS: &str = r#"
    id, ncf_type, serie, start_number, current_number, end_number,
    active, description, created_at, updated_at
"#;

/// Repository for NCF sequences.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    /// Creates a new SequenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Gets a sequence by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<NcfSequence>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Lists sequences, optionally of one type.
    pub async fn list(&self, ncf_type: Option<NcfType>) -> DbResult<Vec<NcfSequence>> {
        let mut conn = self.pool.acquire().await?;
        match ncf_type {
            Some(t) => Self::list_by_type(&mut conn, t).await,
            None => Self::list_all(&mut conn).await,
        }
    }

    // =========================================================================
    // In-transaction operations
    // =========================================================================

    /// Reads a sequence on the given connection.
    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<NcfSequence>> {
        let sql = format!("SELECT {} FROM ncf_sequences WHERE id = ?1", SEQUENCE_COLUMNS);
        let seq = sqlx::query_as::<_, NcfSequence>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(seq)
    }

    /// All sequences of one type, oldest range first.
    pub async fn list_by_type(
        conn: &mut SqliteConnection,
        ncf_type: NcfType,
    ) -> DbResult<Vec<NcfSequence>> {
        let sql = format!(
            "SELECT {} FROM ncf_sequences WHERE ncf_type = ?1 ORDER BY start_number, id",
            SEQUENCE_COLUMNS
        );
        let seqs = sqlx::query_as::<_, NcfSequence>(&sql)
            .bind(ncf_type)
            .fetch_all(&mut *conn)
            .await?;

        Ok(seqs)
    }

    /// Every sequence.
    pub async fn list_all(conn: &mut SqliteConnection) -> DbResult<Vec<NcfSequence>> {
        let sql = format!(
            "SELECT {} FROM ncf_sequences ORDER BY ncf_type, start_number, id",
            SEQUENCE_COLUMNS
        );
        let seqs = sqlx::query_as::<_, NcfSequence>(&sql)
            .fetch_all(&mut *conn)
            .await?;

        Ok(seqs)
    }

    /// Inserts a new sequence.
    pub async fn insert(conn: &mut SqliteConnection, seq: &NcfSequence) -> DbResult<()> {
        debug!(id = %seq.id, serie = %seq.serie, start = seq.start_number, end = seq.end_number, "Inserting NCF sequence");

        sqlx::query(
            r#"
            INSERT INTO ncf_sequences (
                id, ncf_type, serie, start_number, current_number, end_number,
                active, description, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&seq.id)
        .bind(seq.ncf_type)
        .bind(&seq.serie)
        .bind(seq.start_number)
        .bind(seq.current_number)
        .bind(seq.end_number)
        .bind(seq.active)
        .bind(&seq.description)
        .bind(seq.created_at)
        .bind(seq.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Activates or deactivates a sequence.
    pub async fn set_active(
        conn: &mut SqliteConnection,
        id: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE ncf_sequences SET active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("NcfSequence", id));
        }
        Ok(())
    }

    /// Moves the end of the range. The storage trigger refuses shrinking.
    pub async fn set_end(
        conn: &mut SqliteConnection,
        id: &str,
        end_number: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE ncf_sequences SET end_number = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(end_number)
                .bind(now)
                .execute(&mut *conn)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("NcfSequence", id));
        }
        Ok(())
    }

    /// Advances the counter by one, compare-and-swap on the value read.
    ///
    /// Returns `false` when the counter was not `expected_current` (or the
    /// sequence was exhausted or deactivated in between).
    pub async fn advance(
        conn: &mut SqliteConnection,
        id: &str,
        expected_current: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ncf_sequences
            SET current_number = current_number + 1, updated_at = ?3
            WHERE id = ?1 AND current_number = ?2 AND current_number <= end_number AND active = 1
            "#,
        )
        .bind(id)
        .bind(expected_current)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn sequence(id: &str, serie: &str, start: i64, end: i64, active: bool) -> NcfSequence {
        let now = Utc::now();
        NcfSequence {
            id: id.to_string(),
            ncf_type: NcfType::FinalConsumer,
            serie: serie.to_string(),
            start_number: start,
            current_number: start,
            end_number: end,
            active,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_advance_is_compare_and_swap() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        SequenceRepository::insert(&mut conn, &sequence("q-1", "B01", 1, 2, true))
            .await
            .unwrap();

        assert!(SequenceRepository::advance(&mut conn, "q-1", 1, Utc::now()).await.unwrap());
        // Stale expectation
        assert!(!SequenceRepository::advance(&mut conn, "q-1", 1, Utc::now()).await.unwrap());
        assert!(SequenceRepository::advance(&mut conn, "q-1", 2, Utc::now()).await.unwrap());
        // current = 3 = end + 1: exhausted
        assert!(!SequenceRepository::advance(&mut conn, "q-1", 3, Utc::now()).await.unwrap());

        let seq = SequenceRepository::fetch(&mut conn, "q-1").await.unwrap().unwrap();
        assert_eq!(seq.current_number, 3);
        assert!(seq.is_exhausted());
    }

    #[tokio::test]
    async fn test_storage_guards() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        SequenceRepository::insert(&mut conn, &sequence("q-1", "B01", 1, 100, true))
            .await
            .unwrap();

        // Second active sequence on the same serie
        let dup = SequenceRepository::insert(&mut conn, &sequence("q-2", "B01", 101, 200, true)).await;
        assert!(matches!(dup, Err(DbError::UniqueViolation { .. })));

        // Range cannot shrink
        let shrink = SequenceRepository::set_end(&mut conn, "q-1", 50, Utc::now()).await;
        assert!(matches!(shrink, Err(DbError::ConstraintViolation { .. })));

        // Counter cannot go back
        sqlx::query("UPDATE ncf_sequences SET current_number = 10 WHERE id = 'q-1'")
            .execute(&mut *conn)
            .await
            .unwrap();
        let back = sqlx::query("UPDATE ncf_sequences SET current_number = 5 WHERE id = 'q-1'")
            .execute(&mut *conn)
            .await
            .map_err(DbError::from);
        assert!(matches!(back, Err(DbError::ConstraintViolation { .. })));
    }
}
