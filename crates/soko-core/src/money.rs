//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Minor Units (cents)                              │
//! │    KES 11.60 is stored as 1160 cents                                   │
//! │    Tax, discounts and gateway amounts are all integer math             │
//! │                                                                         │
//! │  The mobile-money gateway only accepts WHOLE currency units, so the    │
//! │  amount we push is always rounded UP (`ceil_to_major`). Rounding down  │
//! │  would undercollect.                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use soko_core::money::Money;
//!
//! let price = Money::from_major(500);          // KES 500.00
//! let line = price.multiply_quantity(2);       // KES 1000.00
//! assert_eq!(line.cents(), 100_000);
//!
//! let odd = Money::from_cents(92_850);         // KES 928.50
//! assert_eq!(odd.ceil_to_major().cents(), 92_900);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

/// Minor units per major unit (cents per shilling).
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for deltas and mismatches
/// - **Single field tuple struct**: Zero-cost abstraction over i64
///
/// ## Where Money Flows
/// ```text
/// Product.price_cents ──► CartLine.unit_price ──► CartLine.line_total
///                                                        │
/// CartTotals.subtotal ──► discount ──► taxable_base ──► tax ──► total
///                                                        │
///                      PaymentAttempt.amount_due ◄───────┘
///                                │
///                                ▼
///                      gateway amount = total.ceil_to_major()
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use soko_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole currency units.
    ///
    /// ## Example
    /// ```rust
    /// use soko_core::money::Money;
    ///
    /// assert_eq!(Money::from_major(100).cents(), 10_000);
    /// ```
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * MINOR_UNITS_PER_MAJOR)
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion (truncated toward zero).
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / MINOR_UNITS_PER_MAJOR
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % MINOR_UNITS_PER_MAJOR).abs()
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

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Clamps negative values to zero.
    ///
    /// Used for `taxable_base = max(0, subtotal - discount)`.
    #[inline]
    pub const fn clamp_non_negative(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            Money(self.0)
        }
    }

    /// Rounds UP to the next whole currency unit.
    ///
    /// Push-payment gateways accept integer amounts only. Rounding up
    /// guarantees we never undercollect.
    ///
    /// ## Example
    /// ```rust
    /// use soko_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(116_000).ceil_to_major().cents(), 116_000);
    /// assert_eq!(Money::from_cents(116_001).ceil_to_major().cents(), 116_100);
    /// ```
    pub fn ceil_to_major(&self) -> Money {
        let rem = self.0.rem_euclid(MINOR_UNITS_PER_MAJOR);
        if rem == 0 {
            *self
        } else {
            Money(self.0 - rem + MINOR_UNITS_PER_MAJOR)
        }
    }

    /// Returns the number of whole `unit`s contained in this amount (floor).
    ///
    /// Returns 0 for non-positive amounts or units.
    ///
    /// ## Example
    /// ```rust
    /// use soko_core::money::Money;
    ///
    /// let base = Money::from_major(850);
    /// assert_eq!(base.whole_units_of(Money::from_major(100)), 8);
    /// ```
    pub fn whole_units_of(&self, unit: Money) -> i64 {
        if unit.0 <= 0 || self.0 <= 0 {
            return 0;
        }
        self.0 / unit.0
    }

    /// Calculates tax at the given rate, rounding half up to the nearest cent.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`
    ///
    /// ## Example
    /// ```rust
    /// use soko_core::money::Money;
    /// use soko_core::types::TaxRate;
    ///
    /// let base = Money::from_major(800);
    /// let tax = base.calculate_tax(TaxRate::from_bps(1600)); // 16%
    /// assert_eq!(tax, Money::from_major(128));
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        // i128 prevents overflow on large amounts
        let tax_cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(tax_cents as i64)
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use soko_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Human-readable amount, e.g. `1,160.00`.
///
/// ## Note
/// No currency symbol: the receipt header carries the currency code.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let major = self.major().abs().to_string();

        let mut grouped = String::with_capacity(major.len() + major.len() / 3);
        for (i, ch) in major.chars().enumerate() {
            if i > 0 && (major.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        write!(f, "{}{}.{:02}", sign, grouped, self.cents_part())
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
    fn test_from_major() {
        let money = Money::from_major(500);
        assert_eq!(money.cents(), 50_000);
        assert_eq!(money.major(), 500);
        assert_eq!(money.cents_part(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_major(1160).to_string(), "1,160.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_major(1_234_567).to_string(), "1,234,567.00");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_tax_at_sixteen_percent() {
        let base = Money::from_major(1000);
        assert_eq!(base.calculate_tax(TaxRate::from_bps(1600)), Money::from_major(160));
    }

    #[test]
    fn test_tax_rounds_half_up() {
        // 10.00 at 8.25% = 0.825 → 0.83
        let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
        assert_eq!(tax.cents(), 83);
    }

    #[test]
    fn test_ceil_to_major() {
        assert_eq!(Money::from_cents(100).ceil_to_major().cents(), 100);
        assert_eq!(Money::from_cents(101).ceil_to_major().cents(), 200);
        assert_eq!(Money::from_cents(199).ceil_to_major().cents(), 200);
        assert_eq!(Money::zero().ceil_to_major(), Money::zero());
    }

    #[test]
    fn test_whole_units_of_floors() {
        let unit = Money::from_major(100);
        assert_eq!(Money::from_major(999).whole_units_of(unit), 9);
        assert_eq!(Money::from_major(100).whole_units_of(unit), 1);
        assert_eq!(Money::from_major(99).whole_units_of(unit), 0);
        assert_eq!(Money::from_major(-500).whole_units_of(unit), 0);
        assert_eq!(Money::from_major(500).whole_units_of(Money::zero()), 0);
    }

    #[test]
    fn test_clamp_non_negative() {
        assert_eq!(Money::from_cents(-1).clamp_non_negative(), Money::zero());
        assert_eq!(Money::from_cents(5).clamp_non_negative().cents(), 5);
    }
}
