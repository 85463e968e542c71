//! # Money Module
//!
//! Provides the `Money` type for Dominican peso amounts.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    118.00 / 1.18 = 99.99999999999999  ❌ in binary floating point       │
//! │                                                                         │
//! │  OUR SOLUTION: Integer centavos + one rounding rule                     │
//! │    11800 × 10000 / 11800 = 10000 exactly                                │
//! │    Every division rounds half away from zero, once, at a fixed step    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fiscal_core::money::Money;
//!
//! let price = Money::from_cents(11800); // RD$118.00
//! let doubled = price * 2;              // RD$236.00
//! assert_eq!(doubled.cents(), 23600);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in centavos.
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Product.price_cents ──► SaleItem.unit_price_cents (frozen at add)     │
/// │                                   │                                     │
/// │                                   ▼                                     │
/// │                 TaxEngine ──► subtotal / tax / service / total          │
/// │                                   │                                     │
/// │                                   ▼                                     │
/// │            Sale snapshot ──► receipt, credit notes, export              │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from centavos.
    ///
    /// ## Example
    /// ```rust
    /// use fiscal_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole pesos.
    #[inline]
    pub const fn from_pesos(pesos: i64) -> Self {
        Money(pesos * 100)
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole peso portion.
    #[inline]
    pub const fn pesos(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the centavo portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use fiscal_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Computes `self × numerator / denominator`, rounded half away from
    /// zero to the centavo.
    ///
    /// This is the only rounding primitive in the engine. Intermediate
    /// products are computed in i128 so no ratio is ever rounded on its own.
    ///
    /// ## Example
    /// ```rust
    /// use fiscal_core::money::Money;
    ///
    /// // Base of an 18% inclusive price: 118.00 × 10000 / 11800
    /// let base = Money::from_cents(11800).mul_div_round(10_000, 11_800);
    /// assert_eq!(base.cents(), 10000);
    ///
    /// // 0.5 rounds away from zero in both directions
    /// assert_eq!(Money::from_cents(5).mul_div_round(1, 10).cents(), 1);
    /// assert_eq!(Money::from_cents(-5).mul_div_round(1, 10).cents(), -1);
    /// ```
    pub fn mul_div_round(&self, numerator: i128, denominator: i128) -> Money {
        Money::from_cents(div_round_half_away(self.0 as i128 * numerator, denominator))
    }

    /// Applies a basis-point rate (e.g. the 10% service charge), rounded
    /// half away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use fiscal_core::money::Money;
    /// use fiscal_core::types::TaxRate;
    ///
    /// let service = Money::from_cents(30000).apply_rate(TaxRate::from_bps(1000));
    /// assert_eq!(service.cents(), 3000);
    /// ```
    pub fn apply_rate(&self, rate: TaxRate) -> Money {
        self.mul_div_round(rate.bps() as i128, 10_000)
    }
}

/// Integer division rounding half away from zero.
///
/// A zero denominator yields zero; callers treat an empty base as "no share".
pub(crate) fn div_round_half_away(numerator: i128, denominator: i128) -> i64 {
    if denominator == 0 {
        return 0;
    }
    let negative = (numerator < 0) != (denominator < 0);
    let (n, d) = (numerator.abs(), denominator.abs());
    let rounded = (2 * n + d) / (2 * d);
    if negative {
        -(rounded as i64)
    } else {
        rounded as i64
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Shows money as `RD$1234.56`.
///
/// ## Note
/// This is for logs and debugging. Receipt formatting belongs to the
/// rendering collaborator.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}RD${}.{:02}", sign, self.pesos().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.pesos(), 10);
        assert_eq!(money.cents_part(), 99);
        assert_eq!(Money::from_pesos(118).cents(), 11800);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(11800).to_string(), "RD$118.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-RD$5.50");
        assert_eq!(Money::zero().to_string(), "RD$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);
        let total: Money = [a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(div_round_half_away(15, 10), 2);
        assert_eq!(div_round_half_away(25, 10), 3);
        assert_eq!(div_round_half_away(-25, 10), -3);
        assert_eq!(div_round_half_away(24, 10), 2);
        assert_eq!(div_round_half_away(7, 0), 0);
    }

    #[test]
    fn test_inclusive_base_extraction() {
        // 100.00 at 18% inclusive: 10000 × 10000 / 11800 = 8474.57… → 8475
        let base = Money::from_cents(10000).mul_div_round(10_000, 11_800);
        assert_eq!(base.cents(), 8475);
    }

    #[test]
    fn test_apply_rate() {
        assert_eq!(
            Money::from_cents(1005).apply_rate(TaxRate::from_bps(1000)).cents(),
            101
        );
        assert_eq!(
            Money::from_cents(10000).apply_rate(TaxRate::from_bps(1800)).cents(),
            1800
        );
    }
}
