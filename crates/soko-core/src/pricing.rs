//! # Pricing
//!
//! Turns a cart subtotal plus a loyalty redemption into the amounts the
//! customer pays and the points they earn.
//!
//! ## Calculation Order
//! ```text
//! subtotal ─────────────────────────────┐
//!                                       ▼
//! points_to_redeem ──► loyalty_discount ──► taxable_base = max(0, subtotal - discount)
//!   floor(points / POINTS_PER_UNIT)             │
//!   × REDEMPTION_UNIT_VALUE                     ├──► tax = registered ? base × rate : 0
//!                                               │
//!                                               ├──► total = base + tax
//!                                               │
//!                                               └──► points_to_earn
//!                                                    floor(base / EARN_UNIT) × EARN_POINTS
//! ```
//!
//! Points are earned on the taxable base, never on the pre-discount subtotal.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::TaxRate;

/// Business rules for tax and loyalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Businesses that are not VAT-registered charge no tax.
    pub tax_registered: bool,
    pub tax_rate: TaxRate,
    /// Points consumed per redemption unit.
    pub points_per_redemption_unit: i64,
    /// Discount granted per redemption unit.
    pub redemption_unit_value: Money,
    /// Spend needed to earn `earn_points_per_unit` points.
    pub earn_unit: Money,
    pub earn_points_per_unit: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        PricingPolicy {
            tax_registered: false,
            tax_rate: TaxRate::from_bps(1600),
            points_per_redemption_unit: 100,
            redemption_unit_value: Money::from_major(100),
            earn_unit: Money::from_major(100),
            earn_points_per_unit: 1,
        }
    }
}

impl PricingPolicy {
    /// Number of whole redemption units a points amount buys.
    pub fn redemption_units(&self, points: i64) -> i64 {
        if self.points_per_redemption_unit <= 0 || points <= 0 {
            return 0;
        }
        points / self.points_per_redemption_unit
    }
}

/// Derived cart amounts. Recomputed on every call, never stored on the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub subtotal: Money,
    pub loyalty_discount: Money,
    pub taxable_base: Money,
    pub tax: Money,
    pub total: Money,
    /// Points actually consumed (whole redemption units only).
    pub points_redeemed: i64,
    pub points_to_earn: i64,
}

impl CartTotals {
    /// Totals of an empty cart.
    pub fn empty() -> Self {
        CartTotals {
            subtotal: Money::zero(),
            loyalty_discount: Money::zero(),
            taxable_base: Money::zero(),
            tax: Money::zero(),
            total: Money::zero(),
            points_redeemed: 0,
            points_to_earn: 0,
        }
    }
}

/// Computes cart totals.
///
/// Pure and deterministic. The discount is always floored to whole
/// redemption units so it can never exceed what the redeemed points are
/// worth.
///
/// ## Example
/// ```rust
/// use soko_core::money::Money;
/// use soko_core::pricing::{compute_totals, PricingPolicy};
///
/// let policy = PricingPolicy { tax_registered: true, ..Default::default() };
/// let totals = compute_totals(Money::from_major(1000), 200, &policy);
///
/// assert_eq!(totals.loyalty_discount, Money::from_major(200));
/// assert_eq!(totals.tax, Money::from_major(128));
/// assert_eq!(totals.total, Money::from_major(928));
/// assert_eq!(totals.points_to_earn, 8);
/// ```
pub fn compute_totals(subtotal: Money, points_to_redeem: i64, policy: &PricingPolicy) -> CartTotals {
    let units = policy.redemption_units(points_to_redeem);
    let loyalty_discount = policy.redemption_unit_value * units;
    let points_redeemed = units * policy.points_per_redemption_unit;

    let taxable_base = (subtotal - loyalty_discount).clamp_non_negative();

    let tax = if policy.tax_registered {
        taxable_base.calculate_tax(policy.tax_rate)
    } else {
        Money::zero()
    };

    let points_to_earn = taxable_base.whole_units_of(policy.earn_unit) * policy.earn_points_per_unit;

    CartTotals {
        subtotal,
        loyalty_discount,
        taxable_base,
        tax,
        total: taxable_base + tax,
        points_redeemed,
        points_to_earn,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> PricingPolicy {
        PricingPolicy {
            tax_registered: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_registered_no_loyalty() {
        let totals = compute_totals(Money::from_major(1000), 0, &registered());

        assert_eq!(totals.subtotal, Money::from_major(1000));
        assert_eq!(totals.loyalty_discount, Money::zero());
        assert_eq!(totals.tax, Money::from_major(160));
        assert_eq!(totals.total, Money::from_major(1160));
        assert_eq!(totals.points_to_earn, 10);
    }

    #[test]
    fn test_redeem_two_hundred_points() {
        let totals = compute_totals(Money::from_major(1000), 200, &registered());

        assert_eq!(totals.loyalty_discount, Money::from_major(200));
        assert_eq!(totals.taxable_base, Money::from_major(800));
        assert_eq!(totals.tax, Money::from_major(128));
        assert_eq!(totals.total, Money::from_major(928));
        // Earned on 800, not 1000
        assert_eq!(totals.points_to_earn, 8);
        assert_eq!(totals.points_redeemed, 200);
    }

    #[test]
    fn test_unregistered_business_charges_no_tax() {
        let totals = compute_totals(Money::from_major(1000), 0, &PricingPolicy::default());
        assert_eq!(totals.tax, Money::zero());
        assert_eq!(totals.total, totals.taxable_base);
    }

    #[test]
    fn test_partial_redemption_unit_is_floored() {
        let totals = compute_totals(Money::from_major(1000), 250, &registered());
        assert_eq!(totals.loyalty_discount, Money::from_major(200));
        assert_eq!(totals.points_redeemed, 200);
    }

    #[test]
    fn test_discount_larger_than_subtotal_clamps_base() {
        let totals = compute_totals(Money::from_major(150), 300, &registered());
        assert_eq!(totals.taxable_base, Money::zero());
        assert_eq!(totals.tax, Money::zero());
        assert_eq!(totals.total, Money::zero());
        assert_eq!(totals.points_to_earn, 0);
    }

    #[test]
    fn test_total_identity_holds_across_inputs() {
        for policy in [registered(), PricingPolicy::default()] {
            for subtotal_cents in [0_i64, 1, 99, 12_345, 100_000, 987_654] {
                for points in [0_i64, 50, 100, 199, 1_000] {
                    let totals = compute_totals(Money::from_cents(subtotal_cents), points, &policy);
                    assert_eq!(totals.total, totals.taxable_base + totals.tax);
                    assert_eq!(
                        totals.loyalty_discount.cents() % policy.redemption_unit_value.cents(),
                        0
                    );
                    if !policy.tax_registered {
                        assert!(totals.tax.is_zero());
                    }
                }
            }
        }
    }

    #[test]
    fn test_negative_points_redeem_nothing() {
        let totals = compute_totals(Money::from_major(500), -100, &registered());
        assert_eq!(totals.loyalty_discount, Money::zero());
        assert_eq!(totals.points_redeemed, 0);
    }
}
