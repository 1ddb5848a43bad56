//! # Money Module
//!
//! Provides the `Money` type and the two rounding primitives the rest of the
//! core relies on: half-up division and largest-remainder allocation.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Pence                                            │
//! │    Every amount is an i64 count of the smallest currency unit.          │
//! │    Where a split cannot be exact (order discount across three lines),   │
//! │    the leftover pence are handed out explicitly, never lost.            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use till_core::money::{allocate_proportionally, Money};
//!
//! let price = Money::from_pence(1099);
//! let doubled = price * 2;
//! assert_eq!(doubled.pence(), 2198);
//!
//! // 100 pence split across equal weights: nothing is lost
//! let parts = allocate_proportionally(100, &[1, 1, 1]);
//! assert_eq!(parts.iter().sum::<i64>(), 100);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::VatRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in pence (the smallest currency unit).
///
/// ## Design Decisions
/// - **i64 (signed)**: negative values appear in reversals and cash refunds
/// - **Single field tuple struct**: zero-cost abstraction over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from pence.
    ///
    /// ```rust
    /// use till_core::money::Money;
    ///
    /// let price = Money::from_pence(1099);
    /// assert_eq!(price.pence(), 1099);
    /// ```
    #[inline]
    pub const fn from_pence(pence: i64) -> Self {
        Money(pence)
    }

    /// Returns the value in pence.
    #[inline]
    pub const fn pence(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Exclusive VAT on this amount, rounded half-up.
    ///
    /// ## Implementation
    /// `(amount * bps + 5000) / 10000` in i128, so a 20% rate on 1 pence
    /// rounds to 0 and on 3 pence rounds to 1.
    ///
    /// ```rust
    /// use till_core::money::Money;
    /// use till_core::types::VatRate;
    ///
    /// let net = Money::from_pence(1000);
    /// assert_eq!(net.calculate_vat(VatRate::from_bps(825)).pence(), 83);
    /// ```
    pub fn calculate_vat(&self, rate: VatRate) -> Money {
        Money(div_round_half_up(
            self.0 as i128 * rate.bps() as i128,
            10_000,
        ))
    }

    /// Multiplies a per-unit price by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Percentage of this amount, rounded half-up. `percent` is clamped to [0, 100].
    pub fn percent_of(&self, percent: i64) -> Money {
        let percent = percent.clamp(0, 100);
        Money(div_round_half_up(self.0 as i128 * percent as i128, 100))
    }
}

// =============================================================================
// Rounding Primitives
// =============================================================================

/// Integer division rounded half away from zero.
///
/// `den` must be positive. Sign follows `num`, so reversals round to the
/// exact negation of the forward amount.
pub fn div_round_half_up(num: i128, den: i128) -> i64 {
    debug_assert!(den > 0, "denominator must be positive");
    let magnitude = (num.abs() * 2 + den) / (den * 2);
    if num < 0 {
        -(magnitude as i64)
    } else {
        magnitude as i64
    }
}

/// Splits `amount` across `weights` in proportion, using the largest-remainder
/// method so the parts always sum to exactly `amount`.
///
/// ## Algorithm
/// ```text
/// amount = 100, weights = [1, 1, 1]
///
///   exact shares:  33.33  33.33  33.33
///   floors:        33     33     33      (sum 99, 1 pence left)
///   remainders:    .33    .33    .33     → ties go to the earliest index
///   result:        34     33     33
/// ```
///
/// Zero or negative weights receive nothing. When every weight is zero the
/// whole amount goes to nobody and an all-zero vector is returned, so callers
/// must not allocate a non-zero amount over an all-zero base.
pub fn allocate_proportionally(amount: i64, weights: &[i64]) -> Vec<i64> {
    let total: i128 = weights.iter().filter(|w| **w > 0).map(|w| *w as i128).sum();
    if total == 0 || amount == 0 {
        return vec![0; weights.len()];
    }

    let amount_abs = amount.unsigned_abs() as i128;
    let mut parts: Vec<i64> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, i128)> = Vec::with_capacity(weights.len());
    let mut allocated: i128 = 0;

    for (idx, weight) in weights.iter().enumerate() {
        if *weight <= 0 {
            parts.push(0);
            continue;
        }
        let scaled = amount_abs * *weight as i128;
        let floor = scaled / total;
        allocated += floor;
        parts.push(floor as i64);
        remainders.push((idx, scaled % total));
    }

    // Largest remainder first; stable sort keeps earlier lines ahead on ties
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    let leftover = (amount_abs - allocated) as usize;
    for (idx, _) in remainders.into_iter().take(leftover) {
        parts[idx] += 1;
    }

    if amount < 0 {
        parts.iter_mut().for_each(|p| *p = -*p);
    }
    parts
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented display: `12.34`. Currency symbols belong to the UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
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

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
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
    fn test_display() {
        assert_eq!(Money::from_pence(1099).to_string(), "10.99");
        assert_eq!(Money::from_pence(5).to_string(), "0.05");
        assert_eq!(Money::from_pence(-550).to_string(), "-5.50");
    }

    #[test]
    fn test_vat_rounds_half_up() {
        // 1000 at 8.25% = 82.5 → 83
        let vat = Money::from_pence(1000).calculate_vat(VatRate::from_bps(825));
        assert_eq!(vat.pence(), 83);

        // 10 at 5% = 0.5 → 1
        let vat = Money::from_pence(10).calculate_vat(VatRate::from_bps(500));
        assert_eq!(vat.pence(), 1);

        // 9 at 5% = 0.45 → 0
        let vat = Money::from_pence(9).calculate_vat(VatRate::from_bps(500));
        assert_eq!(vat.pence(), 0);
    }

    #[test]
    fn test_percent_of_is_clamped() {
        let amount = Money::from_pence(2000);
        assert_eq!(amount.percent_of(10).pence(), 200);
        assert_eq!(amount.percent_of(150).pence(), 2000);
        assert_eq!(amount.percent_of(-5).pence(), 0);
    }

    #[test]
    fn test_div_round_half_up_is_symmetric() {
        assert_eq!(div_round_half_up(5, 2), 3);
        assert_eq!(div_round_half_up(-5, 2), -3);
        assert_eq!(div_round_half_up(4, 3), 1);
        assert_eq!(div_round_half_up(0, 7), 0);
    }

    #[test]
    fn test_allocation_hands_out_leftover_pence() {
        assert_eq!(allocate_proportionally(100, &[1, 1, 1]), vec![34, 33, 33]);
        assert_eq!(allocate_proportionally(10, &[300, 700]), vec![3, 7]);
        // 7 over [1, 2]: exact 2.33 / 4.67 → floors 2 / 4, largest remainder is index 1
        assert_eq!(allocate_proportionally(7, &[1, 2]), vec![2, 5]);
    }

    #[test]
    fn test_allocation_skips_zero_weights_and_keeps_sign() {
        assert_eq!(allocate_proportionally(50, &[0, 10, 0, 10]), vec![0, 25, 0, 25]);
        assert_eq!(allocate_proportionally(-3, &[1, 1]), vec![-2, -1]);
        assert_eq!(allocate_proportionally(50, &[0, 0]), vec![0, 0]);
    }

    #[test]
    fn test_sum_and_neg() {
        let total: Money = [100, 250, -50].into_iter().map(Money::from_pence).sum();
        assert_eq!(total.pence(), 300);
        assert_eq!((-total).pence(), -300);
    }
}
