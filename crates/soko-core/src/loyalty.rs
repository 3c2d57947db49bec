//! # Loyalty Math
//!
//! Redemption caps and earn/redeem previews. Store access lives in
//! `soko-checkout::loyalty`; this module only does arithmetic.
//!
//! ## Redemption Cap
//! ```text
//! max_redeemable = min( balance,
//!                       floor(subtotal / REDEMPTION_UNIT_VALUE) × POINTS_PER_UNIT )
//!
//! balance 250, subtotal 1000.00  →  min(250, 10 × 100) = 250
//! balance 900, subtotal  250.00  →  min(900,  2 × 100) = 200
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::pricing::{CartTotals, PricingPolicy};
use crate::types::LoyaltyAccount;

/// Largest number of points the customer may redeem on this cart.
pub fn max_redeemable(balance: i64, subtotal: Money, policy: &PricingPolicy) -> i64 {
    let units_in_cart = subtotal.whole_units_of(policy.redemption_unit_value);
    let cart_cap = units_in_cart * policy.points_per_redemption_unit;
    balance.max(0).min(cart_cap)
}

/// Rejects a redemption request above `max_redeemable`.
pub fn validate_redemption(
    requested: i64,
    balance: i64,
    subtotal: Money,
    policy: &PricingPolicy,
) -> CoreResult<()> {
    crate::validation::validate_points(requested)?;

    let max = max_redeemable(balance, subtotal, policy);
    if requested > max {
        return Err(CoreError::RedemptionExceedsAvailable { requested, max });
    }
    Ok(())
}

/// What the customer will see before paying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoyaltyPreview {
    pub points_balance: i64,
    pub max_redeemable: i64,
    /// Points that will actually be deducted.
    pub points_redeemed: i64,
    pub discount: Money,
    pub points_to_earn: i64,
    /// Balance once the sale settles.
    pub balance_after: i64,
}

/// Builds the earn/redeem preview for an account against cart totals.
pub fn preview_earn_and_redeem(
    totals: &CartTotals,
    account: &LoyaltyAccount,
    policy: &PricingPolicy,
) -> LoyaltyPreview {
    let balance_after =
        (account.points_balance - totals.points_redeemed + totals.points_to_earn).max(0);

    LoyaltyPreview {
        points_balance: account.points_balance,
        max_redeemable: max_redeemable(account.points_balance, totals.subtotal, policy),
        points_redeemed: totals.points_redeemed,
        discount: totals.loyalty_discount,
        points_to_earn: totals.points_to_earn,
        balance_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::compute_totals;
    use chrono::Utc;

    fn account(balance: i64) -> LoyaltyAccount {
        LoyaltyAccount {
            id: "acc-1".into(),
            phone: "254712345678".into(),
            display_name: None,
            points_balance: balance,
            lifetime_earned: balance,
            lifetime_redeemed: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_max_redeemable_caps() {
        let policy = PricingPolicy::default();
        assert_eq!(max_redeemable(250, Money::from_major(1000), &policy), 250);
        assert_eq!(max_redeemable(900, Money::from_major(250), &policy), 200);
        assert_eq!(max_redeemable(-10, Money::from_major(250), &policy), 0);
        assert_eq!(max_redeemable(500, Money::from_major(99), &policy), 0);
    }

    #[test]
    fn test_validate_redemption() {
        let policy = PricingPolicy::default();
        let subtotal = Money::from_major(1000);

        assert!(validate_redemption(200, 250, subtotal, &policy).is_ok());
        assert!(matches!(
            validate_redemption(300, 250, subtotal, &policy),
            Err(CoreError::RedemptionExceedsAvailable {
                requested: 300,
                max: 250
            })
        ));
        assert!(matches!(
            validate_redemption(-1, 250, subtotal, &policy),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_preview_earns_on_discounted_base() {
        let policy = PricingPolicy {
            tax_registered: true,
            ..Default::default()
        };
        let totals = compute_totals(Money::from_major(1000), 200, &policy);
        let preview = preview_earn_and_redeem(&totals, &account(250), &policy);

        assert_eq!(preview.max_redeemable, 250);
        assert_eq!(preview.points_redeemed, 200);
        assert_eq!(preview.discount, Money::from_major(200));
        assert_eq!(preview.points_to_earn, 8);
        assert_eq!(preview.balance_after, 58);
    }
}
