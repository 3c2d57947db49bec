//! # Loyalty Resolver
//!
//! Phone-keyed member lookup and creation over a `LoyaltyStore`, plus the
//! earn/redeem preview shown before payment. The points math lives in
//! `soko_core::loyalty`; this layer only normalizes input and talks to the
//! store.

use std::sync::Arc;

use tracing::{debug, info};

use soko_core::loyalty::{self, LoyaltyPreview};
use soko_core::validation::{normalize_phone, validate_display_name};
use soko_core::{CartTotals, LoyaltyAccount, Money, PricingPolicy};

use crate::error::CheckoutResult;
use crate::stores::LoyaltyStore;

/// Resolves loyalty members for a checkout.
#[derive(Clone)]
pub struct LoyaltyResolver {
    store: Arc<dyn LoyaltyStore>,
    policy: PricingPolicy,
    country_code: String,
}

impl LoyaltyResolver {
    pub fn new(store: Arc<dyn LoyaltyStore>, policy: PricingPolicy, country_code: impl Into<String>) -> Self {
        LoyaltyResolver {
            store,
            policy,
            country_code: country_code.into(),
        }
    }

    /// Normalizes a raw phone number with the till's country code.
    pub fn normalize(&self, raw: &str) -> CheckoutResult<String> {
        Ok(normalize_phone(raw, &self.country_code)?)
    }

    /// Looks up a member by phone. A miss is `Ok(None)`.
    pub async fn find_by_phone(&self, raw_phone: &str) -> CheckoutResult<Option<LoyaltyAccount>> {
        let phone = self.normalize(raw_phone)?;
        let account = self.store.find_by_phone(&phone).await?;

        debug!(phone = %phone, found = account.is_some(), "Loyalty lookup");
        Ok(account)
    }

    /// Registers a member. Returns the existing account when the phone is
    /// already registered.
    pub async fn create(&self, raw_phone: &str, display_name: Option<&str>) -> CheckoutResult<LoyaltyAccount> {
        let phone = self.normalize(raw_phone)?;
        let name = validate_display_name(display_name)?;

        let account = self.store.create(&phone, name.as_deref()).await?;
        info!(account_id = %account.id, phone = %phone, "Loyalty member resolved");
        Ok(account)
    }

    /// Earn/redeem preview for the current cart totals.
    pub fn preview(&self, totals: &CartTotals, account: &LoyaltyAccount) -> LoyaltyPreview {
        loyalty::preview_earn_and_redeem(totals, account, &self.policy)
    }

    /// Points this account may redeem against `subtotal`.
    pub fn max_redeemable(&self, account: &LoyaltyAccount, subtotal: Money) -> i64 {
        loyalty::max_redeemable(account.points_balance, subtotal, &self.policy)
    }

    /// Rejects a redemption above what the account and cart allow.
    pub fn validate_redemption(
        &self,
        requested: i64,
        account: &LoyaltyAccount,
        subtotal: Money,
    ) -> CheckoutResult<()> {
        Ok(loyalty::validate_redemption(
            requested,
            account.points_balance,
            subtotal,
            &self.policy,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckoutError;
    use crate::memory::MemoryStores;
    use soko_core::{compute_totals, CoreError};

    fn resolver(stores: &MemoryStores) -> LoyaltyResolver {
        LoyaltyResolver::new(stores.stores().loyalty, PricingPolicy::default(), "254")
    }

    #[tokio::test]
    async fn test_lookup_normalizes_phone() {
        let stores = MemoryStores::new();
        let account = stores.add_account("254712345678", 250).await;

        let found = resolver(&stores).find_by_phone("0712 345 678").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(account.id));
    }

    #[tokio::test]
    async fn test_miss_is_not_an_error() {
        let stores = MemoryStores::new();
        assert!(resolver(&stores)
            .find_by_phone("+254 700 000 000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_phone_is_a_precondition() {
        let stores = MemoryStores::new();
        let err = resolver(&stores).find_by_phone("07abc").await.unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_create_returns_existing() {
        let stores = MemoryStores::new();
        let resolver = resolver(&stores);

        let first = resolver.create("0712345678", Some("  Amina ")).await.unwrap();
        assert_eq!(first.display_name.as_deref(), Some("Amina"));

        let again = resolver.create("+254712345678", None).await.unwrap();
        assert_eq!(again.id, first.id);
    }

    #[tokio::test]
    async fn test_redemption_cap() {
        let stores = MemoryStores::new();
        let account = stores.add_account("254712345678", 250).await;
        let resolver = resolver(&stores);
        let subtotal = Money::from_major(1000);

        assert_eq!(resolver.max_redeemable(&account, subtotal), 250);
        resolver.validate_redemption(200, &account, subtotal).unwrap();

        let err = resolver
            .validate_redemption(300, &account, subtotal)
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Core(CoreError::RedemptionExceedsAvailable { max: 250, .. })
        ));

        let totals = compute_totals(subtotal, 200, &PricingPolicy::default());
        let preview = resolver.preview(&totals, &account);
        assert_eq!(preview.discount, Money::from_major(200));
        assert_eq!(preview.points_to_earn, 8);
        assert_eq!(preview.balance_after, 58);
    }
}
