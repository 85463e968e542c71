//! # Sequence Administration
//!
//! Creating and maintaining the authorized NCF ranges. Every change is
//! checked against all existing sequences under the write lock and leaves a
//! before/after snapshot in `ncf_sequence_audit`.
//!
//! ## Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  serie        3 uppercase alphanumerics, first is a letter              │
//! │  range        1 ≤ start ≤ end ≤ 99,999,999                              │
//! │  per type     ranges never overlap, at most one active                  │
//! │  per serie    at most one active sequence across all types              │
//! │  end          only grows                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use super::{new_id, op_span, traced, FiscalEngine};
use crate::error::{DbError, ServiceResult};
use crate::repository::audit::AuditTrail;
use crate::repository::sequence::SequenceRepository;
use crate::retry::with_lock_retry;
use fiscal_core::validation::{validate_sequence_range, validate_serie};
use fiscal_core::{
    Actor, Capability, CoreError, CoreResult, NcfSequence, NcfType, SequenceAction,
    SequenceAuditEntry, ValidationError, MAX_NCF_NUMBER,
};

/// Input for [`FiscalEngine::create_sequence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSequence {
    pub ncf_type: NcfType,
    /// Uppercased before validation.
    pub serie: String,
    pub start_number: i64,
    pub end_number: i64,
    pub description: Option<String>,
    pub active: bool,
}

/// A sequence with its availability.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceStatus {
    pub sequence: NcfSequence,
    pub remaining: i64,
    pub exhausted: bool,
    /// At or below the configured warning threshold.
    pub low: bool,
}

impl FiscalEngine {
    /// Registers a new authorized range.
    ///
    /// ## Errors
    /// - `Validation` for a malformed serie or range
    /// - `SequenceOverlap` when the range collides with one of the same type
    /// - `ActiveSequenceExists` / `SerieInUse` when created active
    pub async fn create_sequence(
        &self,
        actor: &Actor,
        new: NewSequence,
    ) -> ServiceResult<NcfSequence> {
        traced(op_span("create_sequence", actor, &new.serie), async {
            actor.authorize(Capability::ManageSequences)?;

            let serie = new.serie.trim().to_uppercase();
            validate_serie(&serie).map_err(CoreError::from)?;
            validate_sequence_range(new.start_number, new.end_number).map_err(CoreError::from)?;
            let new = NewSequence { serie, ..new };
            let new = &new;

            with_lock_retry(self.retry, "create_sequence", move || {
                self.create_sequence_once(actor, new)
            })
            .await
        })
        .await
    }

    async fn create_sequence_once(
        &self,
        actor: &Actor,
        new: &NewSequence,
    ) -> ServiceResult<NcfSequence> {
        let mut tx = self.db.begin_immediate().await?;

        let all = SequenceRepository::list_all(&mut tx).await?;
        check_range(&all, new.ncf_type, new.start_number, new.end_number, None)?;
        if new.active {
            check_activation(&all, new.ncf_type, &new.serie, None)?;
        }

        let now = Utc::now();
        let seq = NcfSequence {
            id: new_id(),
            ncf_type: new.ncf_type,
            serie: new.serie.clone(),
            start_number: new.start_number,
            current_number: new.start_number,
            end_number: new.end_number,
            active: new.active,
            description: new.description.clone(),
            created_at: now,
            updated_at: now,
        };
        SequenceRepository::insert(&mut tx, &seq).await?;
        record_change(&mut tx, actor, SequenceAction::Create, None, &seq, now).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sequence_id = %seq.id,
            serie = %seq.serie,
            ncf_type = %seq.ncf_type,
            start = seq.start_number,
            end = seq.end_number,
            active = seq.active,
            "NCF sequence created"
        );
        Ok(seq)
    }

    /// Makes a sequence the active one for its type. Already active is a
    /// no-op.
    pub async fn activate_sequence(
        &self,
        actor: &Actor,
        sequence_id: &str,
    ) -> ServiceResult<NcfSequence> {
        traced(op_span("activate_sequence", actor, sequence_id), async {
            actor.authorize(Capability::ManageSequences)?;
            with_lock_retry(self.retry, "activate_sequence", move || {
                self.set_active_once(actor, sequence_id, true)
            })
            .await
        })
        .await
    }

    /// Stops issuing from a sequence. Already inactive is a no-op.
    pub async fn deactivate_sequence(
        &self,
        actor: &Actor,
        sequence_id: &str,
    ) -> ServiceResult<NcfSequence> {
        traced(op_span("deactivate_sequence", actor, sequence_id), async {
            actor.authorize(Capability::ManageSequences)?;
            with_lock_retry(self.retry, "deactivate_sequence", move || {
                self.set_active_once(actor, sequence_id, false)
            })
            .await
        })
        .await
    }

    async fn set_active_once(
        &self,
        actor: &Actor,
        sequence_id: &str,
        active: bool,
    ) -> ServiceResult<NcfSequence> {
        let mut tx = self.db.begin_immediate().await?;
        let before = load_sequence(&mut tx, sequence_id).await?;
        if before.active == active {
            return Ok(before);
        }

        if active {
            if before.is_exhausted() {
                return Err(CoreError::SequenceExhausted {
                    serie: before.serie,
                    end_number: before.end_number,
                }
                .into());
            }
            let all = SequenceRepository::list_all(&mut tx).await?;
            check_activation(&all, before.ncf_type, &before.serie, Some(&before.id))?;
        }

        let now = Utc::now();
        SequenceRepository::set_active(&mut tx, sequence_id, active, now).await?;
        let after = NcfSequence {
            active,
            updated_at: now,
            ..before.clone()
        };
        let action = if active {
            SequenceAction::Activate
        } else {
            SequenceAction::Deactivate
        };
        record_change(&mut tx, actor, action, Some(&before), &after, now).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(sequence_id = %sequence_id, serie = %after.serie, active, "NCF sequence toggled");
        Ok(after)
    }

    /// Moves the end of a range further out (a new authorization from the
    /// tax authority).
    pub async fn extend_sequence_end(
        &self,
        actor: &Actor,
        sequence_id: &str,
        new_end: i64,
    ) -> ServiceResult<NcfSequence> {
        traced(op_span("extend_sequence_end", actor, sequence_id), async {
            actor.authorize(Capability::ManageSequences)?;
            validate_sequence_range(1, new_end).map_err(CoreError::from)?;
            with_lock_retry(self.retry, "extend_sequence_end", move || {
                self.extend_sequence_end_once(actor, sequence_id, new_end)
            })
            .await
        })
        .await
    }

    async fn extend_sequence_end_once(
        &self,
        actor: &Actor,
        sequence_id: &str,
        new_end: i64,
    ) -> ServiceResult<NcfSequence> {
        let mut tx = self.db.begin_immediate().await?;
        let before = load_sequence(&mut tx, sequence_id).await?;

        if new_end <= before.end_number {
            return Err(CoreError::from(ValidationError::OutOfRange {
                field: "end_number".to_string(),
                min: before.end_number + 1,
                max: MAX_NCF_NUMBER,
            })
            .into());
        }
        let all = SequenceRepository::list_all(&mut tx).await?;
        check_range(
            &all,
            before.ncf_type,
            before.start_number,
            new_end,
            Some(&before.id),
        )?;

        let now = Utc::now();
        SequenceRepository::set_end(&mut tx, sequence_id, new_end, now).await?;
        let after = NcfSequence {
            end_number: new_end,
            updated_at: now,
            ..before.clone()
        };
        record_change(&mut tx, actor, SequenceAction::ExtendEnd, Some(&before), &after, now)
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sequence_id = %sequence_id,
            old_end = before.end_number,
            new_end,
            "NCF sequence extended"
        );
        Ok(after)
    }

    /// Lists sequences, optionally of one type.
    pub async fn list_sequences(&self, ncf_type: Option<NcfType>) -> ServiceResult<Vec<NcfSequence>> {
        Ok(self.db.sequences().list(ncf_type).await?)
    }

    /// Availability of one sequence.
    pub async fn sequence_status(&self, sequence_id: &str) -> ServiceResult<SequenceStatus> {
        let sequence = self
            .db
            .sequences()
            .get_by_id(sequence_id)
            .await?
            .ok_or_else(|| CoreError::not_found("NcfSequence", sequence_id))?;

        let remaining = sequence.remaining();
        let exhausted = sequence.is_exhausted();
        Ok(SequenceStatus {
            low: !exhausted && remaining <= self.settings.low_sequence_warning,
            remaining,
            exhausted,
            sequence,
        })
    }
}

async fn load_sequence(conn: &mut SqliteConnection, id: &str) -> ServiceResult<NcfSequence> {
    let seq = SequenceRepository::fetch(conn, id)
        .await?
        .ok_or_else(|| CoreError::not_found("NcfSequence", id))?;
    Ok(seq)
}

/// Rejects a range that overlaps another sequence of the same type.
fn check_range(
    all: &[NcfSequence],
    ncf_type: NcfType,
    start: i64,
    end: i64,
    exclude: Option<&str>,
) -> CoreResult<()> {
    let clash = all
        .iter()
        .filter(|s| s.ncf_type == ncf_type && Some(s.id.as_str()) != exclude)
        .find(|s| s.overlaps(start, end));

    match clash {
        Some(other) => Err(CoreError::SequenceOverlap {
            start,
            end,
            other_serie: other.serie.clone(),
            other_start: other.start_number,
            other_end: other.end_number,
        }),
        None => Ok(()),
    }
}

/// Rejects activation when the type or the serie already has an active
/// sequence.
fn check_activation(
    all: &[NcfSequence],
    ncf_type: NcfType,
    serie: &str,
    exclude: Option<&str>,
) -> CoreResult<()> {
    let mut active = all
        .iter()
        .filter(|s| s.active && Some(s.id.as_str()) != exclude);

    if active.clone().any(|s| s.ncf_type == ncf_type) {
        return Err(CoreError::ActiveSequenceExists(ncf_type));
    }
    if active.any(|s| s.serie == serie) {
        return Err(CoreError::SerieInUse(serie.to_string()));
    }
    Ok(())
}

async fn record_change(
    conn: &mut SqliteConnection,
    actor: &Actor,
    action: SequenceAction,
    before: Option<&NcfSequence>,
    after: &NcfSequence,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let before_json = before
        .map(NcfSequence::snapshot_json)
        .transpose()
        .map_err(DbError::from)?;
    let after_json = after.snapshot_json().map_err(DbError::from)?;

    AuditTrail::record_sequence_change(
        conn,
        &SequenceAuditEntry {
            id: new_id(),
            sequence_id: after.id.clone(),
            action,
            actor_id: actor.user_id.clone(),
            before_json,
            after_json,
            created_at: now,
        },
    )
    .await?;
    Ok(())
}
