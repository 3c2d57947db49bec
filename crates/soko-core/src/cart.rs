//! # Cart Aggregator
//!
//! Holds the lines of the sale being rung up and derives its totals.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Operations                                      │
//! │                                                                         │
//! │  Scan / tap product ─────► add_line() ──────────► push or qty += 1     │
//! │                                                                         │
//! │  +/- buttons ────────────► adjust_quantity() ───► qty += delta         │
//! │                                                                         │
//! │  Remove ─────────────────► remove_line() ───────► lines.remove(i)      │
//! │                                                                         │
//! │  New sale ───────────────► clear() ─────────────► lines.clear()        │
//! │                                                                         │
//! │  Checkout ───────────────► totals() / to_draft() (read only)           │
//! │                                                                         │
//! │  NOTE: A rejected operation leaves the cart exactly as it was.          │
//! │        Quantities above stock are rejected, never clamped.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::pricing::{compute_totals, CartTotals, PricingPolicy};
use crate::types::{Product, SaleDraft, SaleLine};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// A line in the cart.
///
/// ## Design Notes
/// sku, name and price are frozen when the line is created so the cart
/// stays consistent even if the catalog changes mid-sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
    /// Stock on hand when the product was scanned.
    pub quantity_available: i64,
}

impl CartLine {
    fn from_product(product: &Product) -> Self {
        CartLine {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            unit_price: product.price(),
            quantity: 1,
            quantity_available: product.quantity_available,
        }
    }

    /// unit_price × quantity.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }

    fn to_sale_line(&self) -> SaleLine {
        SaleLine {
            product_id: self.product_id.clone(),
            sku: self.sku.clone(),
            name: self.name.clone(),
            unit_price_cents: self.unit_price.cents(),
            quantity: self.quantity,
            line_total_cents: self.line_total().cents(),
        }
    }

    /// Checks a prospective quantity against stock and the per-line cap.
    fn check_quantity(&self, new_qty: i64) -> CoreResult<()> {
        if new_qty > self.quantity_available {
            return Err(CoreError::InsufficientStock {
                sku: self.sku.clone(),
                available: self.quantity_available,
                requested: new_qty,
            });
        }
        if new_qty > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: new_qty,
                max: MAX_ITEM_QUANTITY,
            });
        }
        Ok(())
    }
}

/// The cart for one checkout session.
///
/// ## Invariants
/// - Lines are unique by `product_id`
/// - Every line has `1 ≤ quantity ≤ quantity_available`
/// - At most `MAX_CART_ITEMS` lines, each at most `MAX_ITEM_QUANTITY`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new() -> Self {
        Cart { lines: Vec::new() }
    }

    /// Adds one unit of a product, or increments its line if present.
    ///
    /// ## Errors
    /// - `OutOfStock` when the product has nothing on hand
    /// - `InsufficientStock` when one more unit exceeds stock
    /// - `CartTooLarge` when a new line would exceed `MAX_CART_ITEMS`
    pub fn add_line(&mut self, product: &Product) -> CoreResult<()> {
        if product.quantity_available <= 0 {
            return Err(CoreError::OutOfStock {
                sku: product.sku.clone(),
            });
        }

        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product.id) {
            // Refresh the stock snapshot: the catalog knows better than the cart
            let mut candidate = line.clone();
            candidate.quantity_available = product.quantity_available;
            let new_qty = candidate.quantity + 1;
            candidate.check_quantity(new_qty)?;

            candidate.quantity = new_qty;
            *line = candidate;
            return Ok(());
        }

        if self.lines.len() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_ITEMS,
            });
        }

        self.lines.push(CartLine::from_product(product));
        Ok(())
    }

    /// Changes a line's quantity by `delta`.
    ///
    /// A delta that would take the quantity to zero or below is ignored;
    /// use `remove_line` to drop a line.
    pub fn adjust_quantity(&mut self, product_id: &str, delta: i64) -> CoreResult<()> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or_else(|| CoreError::LineNotFound(product_id.to_string()))?;

        let new_qty = line
            .quantity
            .checked_add(delta)
            .ok_or(CoreError::QuantityTooLarge {
                requested: i64::MAX,
                max: MAX_ITEM_QUANTITY,
            })?;
        if new_qty <= 0 {
            return Ok(());
        }

        line.check_quantity(new_qty)?;
        line.quantity = new_qty;
        Ok(())
    }

    /// Removes a line by product ID.
    pub fn remove_line(&mut self, product_id: &str) -> CoreResult<()> {
        let initial_len = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);

        if self.lines.len() == initial_len {
            Err(CoreError::LineNotFound(product_id.to_string()))
        } else {
            Ok(())
        }
    }

    /// Empties the cart.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Lines in insertion order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Finds a line by product ID.
    pub fn line(&self, product_id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Number of distinct lines.
    pub fn item_count(&self) -> usize {
        self.lines.len()
    }

    /// Total quantity of all lines.
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Σ(unit_price × qty).
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Derives totals for the given redemption. Pure.
    pub fn totals(&self, points_to_redeem: i64, policy: &PricingPolicy) -> CartTotals {
        compute_totals(self.subtotal(), points_to_redeem, policy)
    }

    /// Freezes the cart into the draft a payment is taken against.
    pub fn to_draft(
        &self,
        points_to_redeem: i64,
        policy: &PricingPolicy,
        customer_phone: Option<String>,
        loyalty_account_id: Option<String>,
    ) -> CoreResult<SaleDraft> {
        if self.is_empty() {
            return Err(CoreError::EmptyCart);
        }

        Ok(SaleDraft {
            lines: self.lines.iter().map(CartLine::to_sale_line).collect(),
            totals: self.totals(points_to_redeem, policy),
            customer_phone,
            loyalty_account_id,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, price_cents: i64, available: i64) -> Product {
        Product {
            id: id.to_string(),
            sku: format!("SKU-{}", id),
            barcode: None,
            name: format!("Product {}", id),
            price_cents,
            quantity_available: available,
        }
    }

    #[test]
    fn test_add_line_and_increment() {
        let mut cart = Cart::new();
        let p = product("1", 50_000, 10);

        cart.add_line(&p).unwrap();
        cart.add_line(&p).unwrap();

        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total_quantity(), 2);
        assert_eq!(cart.subtotal(), Money::from_major(1000));
    }

    #[test]
    fn test_add_out_of_stock_leaves_cart_unchanged() {
        let mut cart = Cart::new();
        cart.add_line(&product("1", 100, 5)).unwrap();
        let before = cart.clone();

        let err = cart.add_line(&product("2", 100, 0)).unwrap_err();

        assert!(matches!(err, CoreError::OutOfStock { .. }));
        assert_eq!(cart, before);
    }

    #[test]
    fn test_increment_past_stock_is_rejected() {
        let mut cart = Cart::new();
        let p = product("1", 100, 1);
        cart.add_line(&p).unwrap();

        let err = cart.add_line(&p).unwrap_err();

        assert!(matches!(
            err,
            CoreError::InsufficientStock {
                available: 1,
                requested: 2,
                ..
            }
        ));
        assert_eq!(cart.total_quantity(), 1);
    }

    #[test]
    fn test_adjust_quantity() {
        let mut cart = Cart::new();
        cart.add_line(&product("1", 100, 5)).unwrap();

        cart.adjust_quantity("1", 3).unwrap();
        assert_eq!(cart.line("1").unwrap().quantity, 4);

        // Exceeds stock: rejected, not clamped
        assert!(cart.adjust_quantity("1", 2).is_err());
        assert_eq!(cart.line("1").unwrap().quantity, 4);

        // Would reach zero: ignored
        cart.adjust_quantity("1", -4).unwrap();
        assert_eq!(cart.line("1").unwrap().quantity, 4);

        cart.adjust_quantity("1", -3).unwrap();
        assert_eq!(cart.line("1").unwrap().quantity, 1);
    }

    #[test]
    fn test_adjust_missing_line() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.adjust_quantity("nope", 1),
            Err(CoreError::LineNotFound(_))
        ));
    }

    #[test]
    fn test_quantity_cap() {
        let mut cart = Cart::new();
        cart.add_line(&product("1", 100, 5_000)).unwrap();

        let err = cart.adjust_quantity("1", MAX_ITEM_QUANTITY).unwrap_err();
        assert!(matches!(err, CoreError::QuantityTooLarge { .. }));
    }

    #[test]
    fn test_extreme_delta_is_rejected() {
        let mut cart = Cart::new();
        cart.add_line(&product("1", 100, 5)).unwrap();

        let err = cart.adjust_quantity("1", i64::MAX).unwrap_err();
        assert!(matches!(err, CoreError::QuantityTooLarge { .. }));

        cart.adjust_quantity("1", i64::MIN).unwrap();
        assert_eq!(cart.line("1").unwrap().quantity, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cart = Cart::new();
        cart.add_line(&product("1", 100, 5)).unwrap();
        cart.add_line(&product("2", 200, 5)).unwrap();

        cart.remove_line("1").unwrap();
        assert_eq!(cart.item_count(), 1);
        assert!(cart.remove_line("1").is_err());

        cart.clear();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_max_lines() {
        let mut cart = Cart::new();
        for i in 0..MAX_CART_ITEMS {
            cart.add_line(&product(&i.to_string(), 100, 1)).unwrap();
        }

        let err = cart.add_line(&product("overflow", 100, 1)).unwrap_err();
        assert!(matches!(err, CoreError::CartTooLarge { .. }));
    }

    #[test]
    fn test_totals_worked_example() {
        let mut cart = Cart::new();
        let p = product("1", 50_000, 10);
        cart.add_line(&p).unwrap();
        cart.add_line(&p).unwrap();

        let policy = PricingPolicy {
            tax_registered: true,
            ..Default::default()
        };
        let totals = cart.totals(0, &policy);

        assert_eq!(totals.subtotal, Money::from_major(1000));
        assert_eq!(totals.tax, Money::from_major(160));
        assert_eq!(totals.total, Money::from_major(1160));
    }

    #[test]
    fn test_to_draft() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.to_draft(0, &PricingPolicy::default(), None, None),
            Err(CoreError::EmptyCart)
        ));

        cart.add_line(&product("1", 25_000, 3)).unwrap();
        cart.adjust_quantity("1", 1).unwrap();

        let draft = cart
            .to_draft(0, &PricingPolicy::default(), Some("254712345678".into()), None)
            .unwrap();

        assert_eq!(draft.lines.len(), 1);
        assert_eq!(draft.lines[0].quantity, 2);
        assert_eq!(draft.lines[0].line_total_cents, 50_000);
        assert_eq!(draft.amount_due(), Money::from_major(500));
    }
}
