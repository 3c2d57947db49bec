//! # soko-db: Persistence for the Soko checkout
//!
//! SQLite storage for the catalog, stock, sales, loyalty accounts and the
//! settlement journal, using sqlx with embedded migrations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  soko-checkout (session, orchestrator, reconciler)                      │
//! │       │  store traits implemented over the repositories below           │
//! │       ▼                                                                 │
//! │  ┌─────────────────────── soko-db (THIS CRATE) ──────────────────────┐  │
//! │  │  Database (pool.rs)      Repositories               Migrations    │  │
//! │  │  SqlitePool, WAL,        Product / Stock / Sale /   001_initial   │  │
//! │  │  foreign keys on         Loyalty / Settlement       (embedded)    │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  soko.db                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use soko_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("soko.db")).await?;
//! let product = db.products().find_by_barcode("5901234123457").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::loyalty::LoyaltyRepository;
pub use repository::product::ProductRepository;
pub use repository::sale::SaleRepository;
pub use repository::settlement::SettlementRepository;
pub use repository::stock::StockRepository;
