//! # soko-core: Pure Checkout Logic for Soko POS
//!
//! This crate holds the checkout rules as pure functions and plain state
//! machines with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Soko POS Checkout                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 soko-checkout (async orchestration)             │   │
//! │  │   CheckoutSession ──► PaymentPoller ──► SettlementReconciler    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ soko-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │   cart   │ │ pricing  │ │ loyalty  │ │ payment  │          │   │
//! │  │   │  lines   │ │  totals  │ │  caps    │ │   FSM    │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐                       │   │
//! │  │   │ receipt  │ │  money   │ │validation│                       │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘                       │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO TIMERS                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    soko-db (SQLite record stores)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`cart`] - Cart lines and stock checks
//! - [`pricing`] - Totals, tax and loyalty discount
//! - [`loyalty`] - Redemption caps and previews
//! - [`payment`] - Payment attempt state machine
//! - [`receipt`] - Receipt composition and text rendering
//! - [`settlement`] - Sale record construction and saga journal entries
//! - [`money`] - Money type with integer arithmetic
//! - [`types`] - Domain records (Product, SaleRecord, LoyaltyAccount)
//! - [`validation`] - Input rules and phone normalization
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use soko_core::cart::Cart;
//! use soko_core::pricing::PricingPolicy;
//! use soko_core::{Money, Product};
//!
//! let soda = Product {
//!     id: "p1".into(),
//!     sku: "SODA-500".into(),
//!     barcode: None,
//!     name: "Soda 500ml".into(),
//!     price_cents: 50_000,
//!     quantity_available: 10,
//! };
//!
//! let mut cart = Cart::new();
//! cart.add_line(&soda).unwrap();
//! cart.add_line(&soda).unwrap();
//!
//! let policy = PricingPolicy { tax_registered: true, ..Default::default() };
//! let totals = cart.totals(0, &policy);
//! assert_eq!(totals.total, Money::from_major(1160));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod error;
pub mod loyalty;
pub mod money;
pub mod payment;
pub mod pricing;
pub mod receipt;
pub mod settlement;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartLine};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use payment::{
    ChargeResolution, FailureReason, GatewayStatus, OperatorStatus, PaymentAttempt, PaymentState,
    PollObservation, Transition, UnresolvedCharge, UnresolvedReason,
};
pub use pricing::{compute_totals, CartTotals, PricingPolicy};
pub use receipt::{compose_receipt, BusinessProfile, Receipt};
pub use settlement::{build_sale_record, SettledPayment, SettlementEntry, SettlementStep};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines in a single cart.
///
/// ## Business Reason
/// Prevents runaway carts and keeps receipts printable.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line.
///
/// ## Business Reason
/// Catches fat-finger entries (typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;
