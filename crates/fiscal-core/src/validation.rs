//! # Validation Module
//!
//! Input checks run before any lock is taken.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Quantities, series, ranges, RNC, reasons                          │
//! │  └── Fails fast, costs no transaction                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Services (under BEGIN IMMEDIATE)                             │
//! │  ├── Status re-check, stock, sequence selection                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints (quantity > 0, start ≤ current ≤ end + 1)       │
//! │  ├── UNIQUE (serie, number), UNIQUE ncf                                │
//! │  └── Append-only triggers                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::{MAX_ITEM_QUANTITY, MAX_NCF_NUMBER};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a cash amount in centavos (zero allowed).
pub fn validate_cash_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "cash_received".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Validates an NCF sequence range.
///
/// ## Rules
/// - `1 ≤ start ≤ end ≤ 99,999,999`
///
/// ## Example
/// ```rust
/// use fiscal_core::validation::validate_sequence_range;
///
/// assert!(validate_sequence_range(1, 500).is_ok());
/// assert!(validate_sequence_range(0, 500).is_err());
/// assert!(validate_sequence_range(10, 9).is_err());
/// assert!(validate_sequence_range(1, 100_000_000).is_err());
/// ```
pub fn validate_sequence_range(start: i64, end: i64) -> ValidationResult<()> {
    if !(1..=MAX_NCF_NUMBER).contains(&start) {
        return Err(ValidationError::OutOfRange {
            field: "start_number".to_string(),
            min: 1,
            max: MAX_NCF_NUMBER,
        });
    }
    if !(start..=MAX_NCF_NUMBER).contains(&end) {
        return Err(ValidationError::OutOfRange {
            field: "end_number".to_string(),
            min: start,
            max: MAX_NCF_NUMBER,
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates an NCF serie: 3 uppercase alphanumerics starting with a letter.
///
/// ## Example
/// ```rust
/// use fiscal_core::validation::validate_serie;
///
/// assert!(validate_serie("B01").is_ok());
/// assert!(validate_serie("E31").is_ok());
/// assert!(validate_serie("b01").is_err());
/// assert!(validate_serie("101").is_err());
/// assert!(validate_serie("B1").is_err());
/// ```
pub fn validate_serie(serie: &str) -> ValidationResult<()> {
    let bytes = serie.as_bytes();
    let valid = bytes.len() == 3
        && bytes[0].is_ascii_uppercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase());

    if !valid {
        return Err(ValidationError::InvalidFormat {
            field: "serie".to_string(),
            reason: "must be 3 uppercase letters/digits starting with a letter".to_string(),
        });
    }
    Ok(())
}

/// Validates a free-text reason (cancellation, note, adjustment).
///
/// ## Returns
/// The trimmed reason.
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }
    if reason.chars().count() > 500 {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: 500,
        });
    }
    Ok(reason.to_string())
}

/// Validates and normalises a Dominican RNC or cédula.
///
/// ## Rules
/// - Separators (`-`, spaces) are ignored
/// - 9 digits (RNC) starting with 1, 3, 4 or 5
/// - 11 digits (cédula) starting with 0, 1 or 4
///
/// ## Returns
/// The digits only.
///
/// ## Example
/// ```rust
/// use fiscal_core::validation::validate_rnc;
///
/// assert_eq!(validate_rnc("131-24567-8").unwrap(), "131245678");
/// assert_eq!(validate_rnc("001-1234567-8").unwrap(), "00112345678");
/// assert!(validate_rnc("231245678").is_err());
/// assert!(validate_rnc("12345").is_err());
/// ```
pub fn validate_rnc(rnc: &str) -> ValidationResult<String> {
    let digits: String = rnc.chars().filter(|c| !matches!(c, '-' | ' ')).collect();
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "rnc".to_string(),
        reason: reason.to_string(),
    };

    if digits.is_empty() {
        return Err(ValidationError::Required {
            field: "rnc".to_string(),
        });
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("must contain only digits"));
    }
    let first = digits.as_bytes()[0];
    match digits.len() {
        9 if matches!(first, b'1' | b'3' | b'4' | b'5') => Ok(digits),
        11 if matches!(first, b'0' | b'1' | b'4') => Ok(digits),
        9 | 11 => Err(invalid("unexpected leading digit")),
        _ => Err(invalid("must have 9 (RNC) or 11 (cédula) digits")),
    }
}

/// Formats normalised RNC digits for display: `XXX-XXXXX-X` or
/// `XXX-XXXXXXX-X`. Anything else is returned unchanged.
pub fn format_rnc(digits: &str) -> String {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return digits.to_string();
    }
    match digits.len() {
        9 => format!("{}-{}-{}", &digits[..3], &digits[3..8], &digits[8..]),
        11 => format!("{}-{}-{}", &digits[..3], &digits[3..10], &digits[10..]),
        _ => digits.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_serie() {
        assert!(validate_serie("B02").is_ok());
        assert!(validate_serie("EAB").is_ok());
        assert!(validate_serie("").is_err());
        assert!(validate_serie("B0 ").is_err());
        assert!(validate_serie("B011").is_err());
    }

    #[test]
    fn test_validate_sequence_range_edges() {
        assert!(validate_sequence_range(1, 1).is_ok());
        assert!(validate_sequence_range(MAX_NCF_NUMBER, MAX_NCF_NUMBER).is_ok());
        assert!(validate_sequence_range(-5, 10).is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert_eq!(validate_reason("  error de cobro ").unwrap(), "error de cobro");
        assert!(validate_reason("   ").is_err());
        assert!(validate_reason(&"x".repeat(501)).is_err());
    }

    #[test]
    fn test_rnc_round_trip_display() {
        let digits = validate_rnc("401 50062 5").unwrap();
        assert_eq!(digits, "401500625");
        assert_eq!(format_rnc(&digits), "401-50062-5");
        assert_eq!(format_rnc("00112345678"), "001-1234567-8");
        assert!(validate_rnc("9011234567X").is_err());
        assert!(validate_rnc("").is_err());
    }

    #[test]
    fn test_format_rnc_leaves_non_digits_alone() {
        assert_eq!(format_rnc("12ñ456789"), "12ñ456789");
        assert_eq!(format_rnc("131-24567"), "131-24567");
        assert_eq!(format_rnc("1234"), "1234");
    }
}
