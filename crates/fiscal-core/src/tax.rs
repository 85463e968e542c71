//! # Tax Engine
//!
//! Maps priced line items plus the service-charge flag to the subtotal / ITBIS
//! / service charge / total breakdown stored on every sale and note.
//!
//! ## Computation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each line (gross = qty × unit price):                              │
//! │    inclusive  → base = round(gross × 10000 / (10000 + bps))             │
//! │                 subtotal += base, tax_included += gross - base          │
//! │    exclusive  → subtotal += gross                                       │
//! │                 groups[bps] += gross          (only when bps > 0)       │
//! │                                                                         │
//! │  service   = round(subtotal × 10%)            (before exclusive tax)    │
//! │  tax_base  = subtotal + service                                         │
//! │  for each exclusive group:                                              │
//! │    tax_added += round(tax_base × group × bps / (subtotal × 10000))      │
//! │                                                                         │
//! │  tax_amount = tax_included + tax_added                                  │
//! │  total      = subtotal + tax_amount + service                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Amounts are integer centavos. Each rounding happens once, at the step
//! shown; sums of centavos are exact. The same function backs running totals,
//! finalize and credit/debit notes, so all three always agree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::money::{div_round_half_away, Money};
use crate::types::TaxRate;
use crate::SERVICE_CHARGE_BPS;

// =============================================================================
// Inputs / Outputs
// =============================================================================

/// One priced line as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxLine {
    pub quantity: i64,
    pub unit_price: Money,
    pub rate: TaxRate,
    pub included: bool,
}

impl TaxLine {
    pub fn new(quantity: i64, unit_price: Money, rate: TaxRate, included: bool) -> Self {
        TaxLine {
            quantity,
            unit_price,
            rate,
            included,
        }
    }

    /// quantity × unit price.
    #[inline]
    pub fn gross(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }
}

/// Result of [`TaxEngine::compute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxBreakdown {
    /// Net of every tax.
    pub subtotal: Money,
    /// ITBIS embedded in inclusive prices.
    pub tax_included: Money,
    /// ITBIS added on top of exclusive prices (and the service charge).
    pub tax_added: Money,
    /// tax_included + tax_added.
    pub tax_amount: Money,
    pub service_charge: Money,
    pub total: Money,
}

/// Per-line split used on receipts and note items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmounts {
    /// What the line charges before service charge (inclusive: as priced).
    pub gross: Money,
    pub base: Money,
    pub tax: Money,
}

// =============================================================================
// Engine
// =============================================================================

/// Pure tax/service-charge calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxEngine {
    service_charge_rate: TaxRate,
}

impl Default for TaxEngine {
    fn default() -> Self {
        TaxEngine {
            service_charge_rate: TaxRate::from_bps(SERVICE_CHARGE_BPS),
        }
    }
}

impl TaxEngine {
    /// Computes the breakdown for a set of lines.
    ///
    /// ## Example
    /// ```rust
    /// use fiscal_core::money::Money;
    /// use fiscal_core::tax::{TaxEngine, TaxLine};
    /// use fiscal_core::types::TaxRate;
    ///
    /// // 300.00 at 18% exclusive, with service charge
    /// let lines = [TaxLine::new(3, Money::from_cents(10000), TaxRate::from_bps(1800), false)];
    /// let b = TaxEngine::default().compute(&lines, true);
    ///
    /// assert_eq!(b.service_charge.cents(), 3000);
    /// assert_eq!(b.tax_amount.cents(), 5940);
    /// assert_eq!(b.total.cents(), 38940);
    /// ```
    pub fn compute(&self, lines: &[TaxLine], apply_service_charge: bool) -> TaxBreakdown {
        let mut subtotal = Money::zero();
        let mut tax_included = Money::zero();
        let mut exclusive_groups: BTreeMap<TaxRate, Money> = BTreeMap::new();

        for line in lines {
            let gross = line.gross();
            if line.included {
                let base = inclusive_base(gross, line.rate);
                subtotal += base;
                tax_included += gross - base;
            } else {
                subtotal += gross;
                if !line.rate.is_zero() {
                    *exclusive_groups.entry(line.rate).or_default() += gross;
                }
            }
        }

        let service_charge = if apply_service_charge {
            subtotal.apply_rate(self.service_charge_rate)
        } else {
            Money::zero()
        };
        let tax_base = subtotal + service_charge;

        let mut tax_added = Money::zero();
        if !subtotal.is_zero() {
            for (rate, group_subtotal) in &exclusive_groups {
                let numerator =
                    tax_base.cents() as i128 * group_subtotal.cents() as i128 * rate.bps() as i128;
                let denominator = subtotal.cents() as i128 * 10_000;
                tax_added += Money::from_cents(div_round_half_away(numerator, denominator));
            }
        }

        let tax_amount = tax_included + tax_added;
        TaxBreakdown {
            subtotal,
            tax_included,
            tax_added,
            tax_amount,
            service_charge,
            total: subtotal + tax_amount + service_charge,
        }
    }

    /// The service charge rate in use.
    pub fn service_charge_rate(&self) -> TaxRate {
        self.service_charge_rate
    }
}

/// Splits a single line into base and tax with the same rules as
/// [`TaxEngine::compute`] (no service charge).
pub fn line_amounts(line: &TaxLine) -> LineAmounts {
    let gross = line.gross();
    if line.included {
        let base = inclusive_base(gross, line.rate);
        LineAmounts {
            gross,
            base,
            tax: gross - base,
        }
    } else {
        LineAmounts {
            gross,
            base: gross,
            tax: gross.apply_rate(line.rate),
        }
    }
}

fn inclusive_base(gross: Money, rate: TaxRate) -> Money {
    gross.mul_div_round(10_000, 10_000 + rate.bps() as i128)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: i64, cents: i64, bps: u32, included: bool) -> TaxLine {
        TaxLine::new(qty, Money::from_cents(cents), TaxRate::from_bps(bps), included)
    }

    #[test]
    fn test_exclusive_single_line() {
        let b = TaxEngine::default().compute(&[line(1, 10000, 1800, false)], false);
        assert_eq!(b.subtotal.cents(), 10000);
        assert_eq!(b.tax_amount.cents(), 1800);
        assert_eq!(b.total.cents(), 11800);
        assert!(b.service_charge.is_zero());
    }

    #[test]
    fn test_inclusive_single_line() {
        let b = TaxEngine::default().compute(&[line(1, 11800, 1800, true)], false);
        assert_eq!(b.subtotal.cents(), 10000);
        assert_eq!(b.tax_included.cents(), 1800);
        assert_eq!(b.tax_amount.cents(), 1800);
        assert_eq!(b.total.cents(), 11800);
    }

    #[test]
    fn test_service_charge_is_taxed() {
        let b = TaxEngine::default().compute(&[line(1, 30000, 1800, false)], true);
        assert_eq!(b.subtotal.cents(), 30000);
        assert_eq!(b.service_charge.cents(), 3000);
        assert_eq!(b.tax_added.cents(), 5940);
        assert_eq!(b.total.cents(), 38940);
    }

    #[test]
    fn test_mixed_rates_and_exempt_lines() {
        // 100.00 @18% excl + 50.00 @16% excl + 20.00 exempt
        let lines = [
            line(1, 10000, 1800, false),
            line(1, 5000, 1600, false),
            line(2, 1000, 0, false),
        ];
        let b = TaxEngine::default().compute(&lines, false);
        assert_eq!(b.subtotal.cents(), 17000);
        // 17000 × 10000 × 1800 / (17000 × 10000) = 1800 ; 17000 × 5000 × 1600 / ... = 800
        assert_eq!(b.tax_added.cents(), 2600);
        assert_eq!(b.total.cents(), 19600);
    }

    #[test]
    fn test_inclusive_and_exclusive_mix_with_service() {
        let lines = [line(1, 11800, 1800, true), line(1, 10000, 1800, false)];
        let b = TaxEngine::default().compute(&lines, true);
        // subtotal = 10000 + 10000; service = 2000; tax_base = 22000
        // exclusive group share: 22000 × 10000 × 1800 / (20000 × 10000) = 1980
        assert_eq!(b.subtotal.cents(), 20000);
        assert_eq!(b.service_charge.cents(), 2000);
        assert_eq!(b.tax_included.cents(), 1800);
        assert_eq!(b.tax_added.cents(), 1980);
        assert_eq!(b.total.cents(), 20000 + 1800 + 1980 + 2000);
    }

    #[test]
    fn test_empty_lines_are_zero() {
        let b = TaxEngine::default().compute(&[], true);
        assert_eq!(b, TaxBreakdown::default());
    }

    #[test]
    fn test_is_pure() {
        let lines = [line(3, 4599, 1800, true), line(2, 1250, 1600, false)];
        let engine = TaxEngine::default();
        assert_eq!(engine.compute(&lines, true), engine.compute(&lines, true));
    }

    #[test]
    fn test_line_amounts() {
        let a = line_amounts(&line(2, 11800, 1800, true));
        assert_eq!(a.gross.cents(), 23600);
        assert_eq!(a.base.cents(), 20000);
        assert_eq!(a.tax.cents(), 3600);

        let a = line_amounts(&line(1, 5000, 1600, false));
        assert_eq!(a.base.cents(), 5000);
        assert_eq!(a.tax.cents(), 800);
    }
}
