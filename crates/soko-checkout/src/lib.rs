//! # soko-checkout: Checkout Orchestration for Soko POS
//!
//! This crate drives a till checkout from the first scan to the printed
//! receipt: cart, loyalty, cash and mobile-money payment, and the
//! settlement that writes the sale, stock and loyalty records.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Checkout Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 CheckoutSession (one per checkout)               │  │
//! │  │                                                                  │  │
//! │  │  Cart aggregation, customer lookup, redemption, payment guard    │  │
//! │  └──────────┬─────────────────────┬─────────────────────┬───────────┘  │
//! │             ▼                     ▼                     ▼               │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌──────────────────────┐  │
//! │  │ LoyaltyResolver│  │ PaymentOrchestrator│  │ SettlementReconciler │  │
//! │  │                │  │                    │  │                      │  │
//! │  │ Phone lookup,  │  │ Cash, push request │  │ Sale → stock →       │  │
//! │  │ earn/redeem    │  │ + PaymentPoller    │  │ loyalty, journaled,  │  │
//! │  │ preview        │  │ (watch channel)    │  │ receipt composed     │  │
//! │  └───────┬────────┘  └─────────┬──────────┘  └──────────┬───────────┘  │
//! │          │                     │                        │              │
//! │          ▼                     ▼                        ▼              │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌──────────────────────┐  │
//! │  │ Store traits   │  │ MobileMoneyGateway │  │ ReconciliationWorker │  │
//! │  │ (soko-db or    │  │ (reqwest HTTP)     │  │ (backoff retries of  │  │
//! │  │  in-memory)    │  │                    │  │  incomplete entries) │  │
//! │  └────────────────┘  └────────────────────┘  └──────────────────────┘  │
//! │                                                                         │
//! │  Notifier: operator-facing events (payment received, mismatch,         │
//! │  unverified charge, settlement needing review)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`session`] - `CheckoutService` and `CheckoutSession`
//! - [`loyalty`] - Loyalty account lookup and redemption checks
//! - [`orchestrator`] - Cash and mobile-money payment start
//! - [`poller`] - Mobile-money poll loop
//! - [`reconciler`] - Settlement saga and receipt composition
//! - [`retry`] - Background reconciliation worker
//! - [`gateway`] - Mobile-money HTTP client
//! - [`stores`] - Record store traits and their SQLite bindings
//! - `memory` - In-memory stores and a scripted gateway (tests and the
//!   `test-util` feature)
//! - [`notify`] - Operator notifications
//! - [`config`] - Checkout configuration (TOML + env)
//! - [`error`] - Checkout error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use soko_checkout::{CheckoutConfig, CheckoutService, MobileMoneyOutcome};
//! use soko_core::Money;
//! use soko_db::Database;
//!
//! let config = CheckoutConfig::load_or_default(None);
//! let service = CheckoutService::sqlite(&database, config)?;
//! let (_worker, _task) = service.spawn_reconciliation_worker();
//!
//! let mut session = service.open_session();
//! session.on_scan("6001234500012").await?;
//! session.attach_customer("0712 345 678").await?;
//!
//! session.start_mobile_money(None).await?;
//! if let MobileMoneyOutcome::Completed(sale) = session.complete_mobile_money().await? {
//!     println!("{}", sale.receipt_text);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod gateway;
pub mod loyalty;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod stores;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    BusinessSettings, CheckoutConfig, GatewaySettings, PhoneSettings, PollingSettings,
    PricingSettings, ReconciliationSettings,
};
pub use error::{CheckoutError, CheckoutResult, GatewayError, GatewayResult, StoreError, StoreResult};
pub use gateway::{HttpMobileMoneyGateway, MobileMoneyGateway, PushRequest};
pub use loyalty::LoyaltyResolver;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryStores, ScriptedGateway};
pub use notify::{Notification, NotificationLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use orchestrator::PaymentOrchestrator;
pub use poller::{PendingPayment, PollerHandle};
pub use reconciler::{SettlementOutcome, SettlementReconciler};
pub use retry::{CycleReport, ReconciliationWorker, ReconciliationWorkerHandle};
pub use session::{
    CheckoutService, CheckoutSession, CompletedSale, MobileMoneyOutcome, VerificationReport,
};
pub use stores::{LoyaltyStore, ProductCatalog, SaleStore, SettlementJournal, StockStore, Stores};
