//! # Sequence Allocator
//!
//! Hands out the next fiscal number of a type. Runs only inside the
//! caller's `BEGIN IMMEDIATE` transaction, so the increment is durable
//! exactly when the caller commits.
//!
//! ## Protocol
//! ```text
//! sequences of type T
//!      │
//!      ├── 0 active   → NoActiveSequence(T)
//!      ├── >1 active  → MultipleActiveSequences { T, count }
//!      └── 1 active
//!            │
//!            ├── current > end → SequenceExhausted
//!            └── number = current
//!                UPDATE ... SET current = current + 1 WHERE current = number
//!                ncf = serie + zero_pad(number, 8)
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{DbError, ServiceResult};
use crate::repository::sequence::SequenceRepository;
use fiscal_core::{format_ncf, AllocatedNcf, CoreError, NcfType};

/// Allocates fiscal numbers from the active sequence of a type.
#[derive(Debug, Clone, Copy)]
pub struct SequenceAllocator {
    low_sequence_warning: i64,
}

impl SequenceAllocator {
    /// `low_sequence_warning`: warn when this many numbers or fewer remain
    /// after an allocation.
    pub fn new(low_sequence_warning: i64) -> Self {
        SequenceAllocator {
            low_sequence_warning,
        }
    }

    /// Allocates the next number for `ncf_type`.
    pub async fn allocate_next(
        &self,
        conn: &mut SqliteConnection,
        ncf_type: NcfType,
        now: DateTime<Utc>,
    ) -> ServiceResult<AllocatedNcf> {
        let sequences = SequenceRepository::list_by_type(conn, ncf_type).await?;
        let mut active = sequences.into_iter().filter(|s| s.active);

        let seq = match (active.next(), active.next()) {
            (None, _) => return Err(CoreError::NoActiveSequence(ncf_type).into()),
            (Some(seq), None) => seq,
            (Some(_), Some(_)) => {
                return Err(CoreError::MultipleActiveSequences {
                    ncf_type,
                    count: 2 + active.count(),
                }
                .into())
            }
        };

        if seq.is_exhausted() {
            return Err(CoreError::SequenceExhausted {
                serie: seq.serie,
                end_number: seq.end_number,
            }
            .into());
        }

        let number = seq.current_number;
        if !SequenceRepository::advance(conn, &seq.id, number, now).await? {
            // Only reachable if another writer bypassed the write lock
            return Err(DbError::UniqueViolation {
                field: "ncf_sequences.current_number".to_string(),
            }
            .into());
        }

        let remaining = seq.end_number - number;
        if remaining <= self.low_sequence_warning {
            warn!(serie = %seq.serie, remaining, "NCF sequence running low");
        }

        let ncf = format_ncf(&seq.serie, number);
        debug!(ncf = %ncf, sequence_id = %seq.id, "NCF allocated");

        Ok(AllocatedNcf {
            sequence_id: seq.id,
            ncf_type,
            serie: seq.serie,
            number,
            ncf,
        })
    }
}
