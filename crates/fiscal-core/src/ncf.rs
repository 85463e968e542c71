//! # NCF (Número de Comprobante Fiscal)
//!
//! Fiscal receipt numbers, the sequences they are drawn from and the
//! append-only records that prove every number's fate.
//!
//! ## Format
//! ```text
//!   B 01 00000042
//!   │ │  └──────── number, 8 digits, zero padded (1..=99,999,999)
//!   │ └─────────── type code (01 consumo, 02 crédito fiscal, 04 nota crédito…)
//!   └───────────── serie letter (B = paper/legacy, E = electronic)
//!   └──┬─┘
//!     serie (3 chars)
//! ```
//!
//! ## Life of a Number
//! ```text
//! NcfSequence.current_number ──allocate──► NcfLedgerEntry (issued, forever)
//!                                               │
//!                                        cancel │
//!                                               ▼
//!                                         CancelledNcf (retired, forever)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::validation::validate_serie;
use crate::MAX_NCF_NUMBER;

/// Length of a formatted NCF (3-char serie + 8 digits).
pub const NCF_LENGTH: usize = 11;

// =============================================================================
// NCF Type
// =============================================================================

/// Fiscal document type. Each type draws from its own sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum NcfType {
    /// Consumidor final (B01 / E32).
    #[serde(rename = "consumo")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "consumo"))]
    FinalConsumer,
    /// Crédito fiscal, buyer identified by RNC (B02 / E31).
    #[serde(rename = "credito_fiscal")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "credito_fiscal"))]
    TaxCredit,
    /// Gubernamental (B15 / E45).
    #[serde(rename = "gubernamental")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "gubernamental"))]
    Government,
    /// Nota de crédito (B04 / E34).
    #[serde(rename = "nota_credito")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "nota_credito"))]
    CreditNote,
    /// Nota de débito (B03 / E33).
    #[serde(rename = "nota_debito")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "nota_debito"))]
    DebitNote,
}

impl NcfType {
    pub const ALL: [NcfType; 5] = [
        NcfType::FinalConsumer,
        NcfType::TaxCredit,
        NcfType::Government,
        NcfType::CreditNote,
        NcfType::DebitNote,
    ];

    /// Stored / wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NcfType::FinalConsumer => "consumo",
            NcfType::TaxCredit => "credito_fiscal",
            NcfType::Government => "gubernamental",
            NcfType::CreditNote => "nota_credito",
            NcfType::DebitNote => "nota_debito",
        }
    }

    /// Document types that identify the buyer by RNC.
    pub fn requires_rnc(&self) -> bool {
        matches!(self, NcfType::TaxCredit | NcfType::Government)
    }

    /// Types a sale can be finalized with (notes are issued separately).
    pub fn is_sale_type(&self) -> bool {
        !matches!(self, NcfType::CreditNote | NcfType::DebitNote)
    }
}

impl fmt::Display for NcfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NcfType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NcfType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "ncf_type".to_string(),
                reason: format!("unknown NCF type '{}'", s),
            })
    }
}

/// Credit or debit note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    Credit,
    Debit,
}

impl NoteType {
    /// The sequence type a note of this kind is numbered from.
    pub fn ncf_type(&self) -> NcfType {
        match self {
            NoteType::Credit => NcfType::CreditNote,
            NoteType::Debit => NcfType::DebitNote,
        }
    }
}

// =============================================================================
// Sequence
// =============================================================================

/// A range of fiscal numbers authorized for one document type.
///
/// ## Invariants
/// - `1 ≤ start_number ≤ current_number ≤ end_number + 1`
/// - `current_number` never decreases
/// - at most one active sequence per `ncf_type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct NcfSequence {
    pub id: String,
    pub ncf_type: NcfType,
    pub serie: String,
    pub start_number: i64,
    /// Next number to issue.
    pub current_number: i64,
    pub end_number: i64,
    pub active: bool,
    pub description: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl NcfSequence {
    /// Numbers still available.
    pub fn remaining(&self) -> i64 {
        (self.end_number + 1 - self.current_number).max(0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_number > self.end_number
    }

    /// Numbers already handed out (whatever their later fate).
    pub fn issued_count(&self) -> i64 {
        self.current_number - self.start_number
    }

    /// Inclusive range overlap.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start <= self.end_number && self.start_number <= end
    }

    /// JSON snapshot stored in the sequence audit.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Result of one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocatedNcf {
    pub sequence_id: String,
    pub ncf_type: NcfType,
    pub serie: String,
    pub number: i64,
    pub ncf: String,
}

/// Administrative action recorded in the sequence audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SequenceAction {
    Create,
    Activate,
    Deactivate,
    ExtendEnd,
}

/// Append-only before/after snapshot of a sequence edit.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SequenceAuditEntry {
    pub id: String,
    pub sequence_id: String,
    pub action: SequenceAction,
    pub actor_id: String,
    /// JSON snapshot of the sequence before the change (None on create).
    pub before_json: Option<String>,
    pub after_json: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Ledger Records
// =============================================================================

/// One issued fiscal number. Append-only; unique on (serie, number).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct NcfLedgerEntry {
    pub id: String,
    pub sequence_id: String,
    pub ncf_type: NcfType,
    pub serie: String,
    pub number: i64,
    pub ncf: String,
    pub sale_id: Option<String>,
    pub credit_note_id: Option<String>,
    pub issued_by: String,
    pub cash_register_id: Option<String>,
    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,
}

/// A fiscal number permanently retired by cancellation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CancelledNcf {
    pub id: String,
    pub ncf: String,
    pub ncf_type: NcfType,
    pub sale_id: String,
    pub reason: String,
    pub cancelled_by: String,
    #[ts(as = "String")]
    pub cancelled_at: DateTime<Utc>,
}

/// A credit or debit note issued against a completed sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditNote {
    pub id: String,
    pub note_type: NoteType,
    pub original_sale_id: String,
    pub original_ncf: String,
    pub ncf: String,
    pub ncf_sequence_id: String,
    pub reason: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub customer_name: Option<String>,
    pub customer_rnc: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A line of a note. Price and tax fields are copied from the original
/// sale item, never from the live product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditNoteItem {
    pub id: String,
    pub credit_note_id: String,
    pub sale_item_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    pub tax_included: bool,
    pub line_total_cents: i64,
    pub line_tax_cents: i64,
}

/// A fiscal document as the monthly export collaborator consumes it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct FiscalDocument {
    pub ncf: String,
    pub ncf_type: NcfType,
    /// Sale id or credit note id.
    pub document_id: String,
    /// NCF of the modified sale, for notes.
    pub modified_ncf: Option<String>,
    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub customer_name: Option<String>,
    pub customer_rnc: Option<String>,
    pub cancelled: bool,
}

/// Issued, cancelled and missing numbers of one sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SequenceAuditReport {
    pub sequence_id: String,
    pub serie: String,
    pub start_number: i64,
    pub current_number: i64,
    pub issued: Vec<i64>,
    pub cancelled: Vec<String>,
    /// Numbers below `current_number` with no ledger row.
    pub missing: Vec<i64>,
}

// =============================================================================
// Format / Parse
// =============================================================================

/// Formats an NCF: serie followed by the number zero padded to 8 digits.
///
/// ## Example
/// ```rust
/// use fiscal_core::ncf::format_ncf;
///
/// assert_eq!(format_ncf("B01", 42), "B0100000042");
/// ```
pub fn format_ncf(serie: &str, number: i64) -> String {
    format!("{}{:08}", serie, number)
}

/// Parses an NCF back into serie and number.
///
/// Accepts surrounding whitespace and lowercase input; the serie is returned
/// uppercased.
///
/// ## Example
/// ```rust
/// use fiscal_core::ncf::parse_ncf;
///
/// let (serie, number) = parse_ncf(" b0100000042 ").unwrap();
/// assert_eq!(serie, "B01");
/// assert_eq!(number, 42);
/// assert!(parse_ncf("B0100000000").is_err());
/// ```
pub fn parse_ncf(ncf: &str) -> Result<(String, i64), ValidationError> {
    let ncf = ncf.trim().to_uppercase();
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "ncf".to_string(),
        reason: reason.to_string(),
    };

    if ncf.len() != NCF_LENGTH || !ncf.is_ascii() {
        return Err(invalid("must be 11 characters: 3-char serie + 8 digits"));
    }
    let (serie, digits) = ncf.split_at(3);
    validate_serie(serie)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("number part must be 8 digits"));
    }
    let number: i64 = digits
        .parse()
        .map_err(|_| invalid("number part must be 8 digits"))?;
    if !(1..=MAX_NCF_NUMBER).contains(&number) {
        return Err(invalid("number must be between 1 and 99999999"));
    }
    Ok((serie.to_string(), number))
}

/// Serie for a note NCF: the parent sale's serie letter followed by the note
/// sequence's type code.
///
/// ## Example
/// ```rust
/// use fiscal_core::ncf::derive_note_serie;
///
/// assert_eq!(derive_note_serie("B01", "B04"), "B04");
/// assert_eq!(derive_note_serie("E31", "B04"), "E04");
/// ```
pub fn derive_note_serie(parent_serie: &str, note_sequence_serie: &str) -> String {
    let letter = parent_serie
        .chars()
        .next()
        .or_else(|| note_sequence_serie.chars().next())
        .unwrap_or('B');
    let code: String = note_sequence_serie.chars().skip(1).collect();
    format!("{}{}", letter, code)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(start: i64, current: i64, end: i64) -> NcfSequence {
        let now = Utc::now();
        NcfSequence {
            id: "seq".to_string(),
            ncf_type: NcfType::FinalConsumer,
            serie: "B01".to_string(),
            start_number: start,
            current_number: current,
            end_number: end,
            active: true,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_format_parse_bounds() {
        for n in [1, 42, 10_000_000, MAX_NCF_NUMBER] {
            let formatted = format_ncf("E31", n);
            assert_eq!(formatted.len(), NCF_LENGTH);
            assert_eq!(parse_ncf(&formatted).unwrap(), ("E31".to_string(), n));
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_ncf("").is_err());
        assert!(parse_ncf("B01000000").is_err());
        assert!(parse_ncf("B01-0000001").is_err());
        assert!(parse_ncf("10100000001").is_err());
        assert!(parse_ncf("B0100000000").is_err());
    }

    #[test]
    fn test_ncf_type_names() {
        assert_eq!(NcfType::TaxCredit.to_string(), "credito_fiscal");
        assert_eq!("NOTA_CREDITO".parse::<NcfType>().unwrap(), NcfType::CreditNote);
        assert!("factura".parse::<NcfType>().is_err());
        assert!(NcfType::Government.requires_rnc());
        assert!(!NcfType::FinalConsumer.requires_rnc());
        assert_eq!(NoteType::Debit.ncf_type(), NcfType::DebitNote);
    }

    #[test]
    fn test_sequence_counters() {
        let seq = sequence(1, 3, 2);
        assert!(seq.is_exhausted());
        assert_eq!(seq.remaining(), 0);
        assert_eq!(seq.issued_count(), 2);

        let seq = sequence(100, 100, 199);
        assert_eq!(seq.remaining(), 100);
        assert!(seq.overlaps(199, 300));
        assert!(seq.overlaps(1, 100));
        assert!(!seq.overlaps(200, 300));

        let json = seq.snapshot_json().unwrap();
        assert!(json.contains("\"current_number\":100"));
        assert!(json.contains("\"ncf_type\":\"consumo\""));
    }

    #[test]
    fn test_derive_note_serie() {
        assert_eq!(derive_note_serie("B02", "B04"), "B04");
        assert_eq!(derive_note_serie("E32", "B03"), "E03");
    }
}
