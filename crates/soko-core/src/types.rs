//! # Domain Types
//!
//! Core domain types used throughout the checkout core.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │   SaleDraft     │   │  SaleRecord     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │──►│  lines          │──►│  id (UUID)      │       │
//! │  │  sku / barcode  │   │  totals         │   │  attempt id     │       │
//! │  │  price_cents    │   │  loyalty info   │   │  receipt_number │       │
//! │  │  qty available  │   └─────────────────┘   │  payment info   │       │
//! │  └─────────────────┘     (before payment)    └─────────────────┘       │
//! │                                                 (after success)         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ LoyaltyAccount  │   │  LedgerEntry    │   │ PaymentMethod   │       │
//! │  │  phone          │   │  Earn / Redeem  │   │  Cash           │       │
//! │  │  points_balance │   │  sale_id        │   │  MobileMoney    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! Sale lines copy sku, name and price at the time of sale so the record
//! stays correct even if the catalog changes later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::pricing::CartTotals;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1600 bps = 16% (standard VAT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog product as seen by the checkout.
///
/// Catalog CRUD lives elsewhere; checkout only needs the sellable view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Barcode (EAN-13, UPC-A, etc.).
    pub barcode: Option<String>,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Price in cents.
    pub price_cents: i64,

    /// Stock on hand when the product was looked up.
    pub quantity_available: i64,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// The rail a payment was collected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash at the till.
    Cash,
    /// Push payment prompted on the customer's phone.
    MobileMoney,
}

impl PaymentMethod {
    /// Stable string used in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile_money",
        }
    }

    /// Parses the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(PaymentMethod::Cash),
            "mobile_money" => Some(PaymentMethod::MobileMoney),
            _ => None,
        }
    }

    /// Receipt label.
    pub const fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::MobileMoney => "Mobile Money",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sale Line
// =============================================================================

/// A line item frozen at the time of sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: String,
    /// SKU at time of sale (frozen).
    pub sku: String,
    /// Product name at time of sale (frozen).
    pub name: String,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    /// Quantity sold.
    pub quantity: i64,
    /// unit_price × quantity.
    pub line_total_cents: i64,
}

impl SaleLine {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns the line total as Money.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

// =============================================================================
// Sale Draft
// =============================================================================

/// Everything known about a sale before the payment settles.
///
/// Built from the cart when payment starts; it is what the settlement
/// journal stores for an unresolved mobile-money charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDraft {
    pub lines: Vec<SaleLine>,
    pub totals: CartTotals,
    pub customer_phone: Option<String>,
    pub loyalty_account_id: Option<String>,
}

impl SaleDraft {
    /// Amount the customer must pay.
    pub fn amount_due(&self) -> Money {
        self.totals.total
    }
}

// =============================================================================
// Sale Record
// =============================================================================

/// A completed sale. Created exactly once after payment success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: String,
    /// The payment attempt that paid for this sale (idempotency key).
    pub payment_attempt_id: String,
    pub receipt_number: String,
    pub lines: Vec<SaleLine>,
    pub subtotal_cents: i64,
    pub loyalty_discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    /// Cash handed over by the customer.
    pub amount_tendered_cents: Option<i64>,
    /// Cash returned to the customer.
    pub change_cents: Option<i64>,
    /// Amount the gateway reports as settled.
    pub settled_amount_cents: Option<i64>,
    /// Settled amount differs from total by more than the tolerance.
    pub amount_mismatch: bool,
    pub customer_phone: Option<String>,
    pub loyalty_account_id: Option<String>,
    pub points_earned: i64,
    pub points_redeemed: i64,
    /// Gateway settlement receipt (mobile money only).
    pub external_receipt_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SaleRecord {
    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Total quantity of all lines.
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Points delta to apply to the loyalty balance.
    #[inline]
    pub fn points_delta(&self) -> i64 {
        self.points_earned - self.points_redeemed
    }
}

/// Generates a receipt number: `YYMMDD-HHMMSS-NNNN`.
///
/// The suffix comes from the sale id so two sales in the same second on
/// different tills still get distinct numbers.
pub fn receipt_number(created_at: DateTime<Utc>, sale_id: &str) -> String {
    let suffix: u32 = sale_id
        .bytes()
        .filter(u8::is_ascii_hexdigit)
        .take(8)
        .fold(0u32, |acc, b| {
            let digit = (b as char).to_digit(16).unwrap_or(0);
            acc.wrapping_mul(16).wrapping_add(digit)
        });
    format!("{}-{:04}", created_at.format("%y%m%d-%H%M%S"), suffix % 10_000)
}

// =============================================================================
// Loyalty
// =============================================================================

/// A customer's loyalty account, keyed by normalized phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyAccount {
    pub id: String,
    pub phone: String,
    pub display_name: Option<String>,
    pub points_balance: i64,
    pub lifetime_earned: i64,
    pub lifetime_redeemed: i64,
    pub created_at: DateTime<Utc>,
}

/// Direction of a loyalty ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Earn,
    Redeem,
}

impl LedgerEntryKind {
    /// Stable string used in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::Earn => "earn",
            LedgerEntryKind::Redeem => "redeem",
        }
    }

    /// Parses the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "earn" => Some(LedgerEntryKind::Earn),
            "redeem" => Some(LedgerEntryKind::Redeem),
            _ => None,
        }
    }
}

/// One auditable movement of loyalty points.
///
/// `(sale_id, kind)` is unique: a sale earns at most once and redeems at
/// most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    pub sale_id: String,
    pub kind: LedgerEntryKind,
    /// Always non-negative; direction comes from `kind`.
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(1600);
        assert_eq!(rate.bps(), 1600);
        assert!((rate.percentage() - 16.0).abs() < 0.001);
    }

    #[test]
    fn test_payment_method_round_trip_strings() {
        assert_eq!(PaymentMethod::parse("cash"), Some(PaymentMethod::Cash));
        assert_eq!(
            PaymentMethod::parse(PaymentMethod::MobileMoney.as_str()),
            Some(PaymentMethod::MobileMoney)
        );
        assert_eq!(PaymentMethod::parse("card"), None);
    }

    #[test]
    fn test_payment_method_serde_snake_case() {
        let json = serde_json::to_string(&PaymentMethod::MobileMoney).unwrap();
        assert_eq!(json, "\"mobile_money\"");
    }

    #[test]
    fn test_receipt_number_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let number = receipt_number(at, "0000abcd-0000-4000-8000-000000000000");
        assert!(number.starts_with("260314-092653-"));
        assert_eq!(number.len(), "260314-092653-0000".len());
    }

    #[test]
    fn test_receipt_number_differs_by_sale_id() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let a = receipt_number(at, "00000001-0000-4000-8000-000000000000");
        let b = receipt_number(at, "00000002-0000-4000-8000-000000000000");
        assert_ne!(a, b);
    }
}
