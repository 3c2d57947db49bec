//! # Repository Module
//!
//! One repository per aggregate, each holding a clone of the pool.
//!
//! ```text
//! Database ─┬─ products()    → ProductRepository     catalog lookups
//!           ├─ stock()       → StockRepository       levels + movement log
//!           ├─ sales()       → SaleRepository        sales + lines
//!           ├─ loyalty()     → LoyaltyRepository     accounts + ledger
//!           └─ settlements() → SettlementRepository  saga journal + unresolved charges
//! ```
//!
//! Every write that the settlement saga can replay is keyed by the sale or
//! payment attempt, so running it twice changes nothing.

pub mod loyalty;
pub mod product;
pub mod sale;
pub mod settlement;
pub mod stock;
