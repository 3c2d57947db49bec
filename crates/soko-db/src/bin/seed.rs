//! # Demo Data Seeder
//!
//! Fills a till database with a small shop catalog and a couple of loyalty
//! members so the checkout can be exercised end to end.
//!
//! ## Usage
//! ```bash
//! cargo run -p soko-db --bin seed
//! cargo run -p soko-db --bin seed -- --db ./data/soko.db --stock 50
//! ```
//!
//! Barcodes follow `600{index:010}` and prices are whole shillings, so the
//! mobile money amount equals the cart total whenever tax rounds evenly.

use std::env;

use soko_core::Product;
use soko_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// (sku, name, price in whole shillings)
const CATALOG: &[(&str, &str, i64)] = &[
    ("SODA-500", "Soda 500ml", 80),
    ("WATER-1L", "Mineral Water 1L", 60),
    ("MILK-500", "Fresh Milk 500ml", 65),
    ("BREAD-400", "White Bread 400g", 65),
    ("SUGAR-1KG", "Sugar 1kg", 180),
    ("RICE-2KG", "Pishori Rice 2kg", 320),
    ("FLOUR-2KG", "Maize Flour 2kg", 210),
    ("OIL-1L", "Cooking Oil 1L", 390),
    ("TEA-100", "Tea Leaves 100g", 95),
    ("SOAP-BAR", "Bar Soap", 120),
    ("EGGS-TRAY", "Eggs (tray of 30)", 450),
    ("SALT-500", "Table Salt 500g", 30),
];

/// (phone, display name)
const MEMBERS: &[(&str, &str)] = &[
    ("254712345678", "Amina Wanjiru"),
    ("254798765432", "Otieno Kamau"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./soko_dev.db");
    let mut stock: i64 = 25;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--stock" | "-s" => {
                if i + 1 < args.len() {
                    stock = args[i + 1].parse().unwrap_or(25);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Soko POS demo seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>     Database file path (default: ./soko_dev.db)");
                println!("  -s, --stock <N>     Units on hand per product (default: 25)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected, migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Catalog already seeded, delete the database file to regenerate");
        return Ok(());
    }

    for (index, (sku, name, price)) in CATALOG.iter().enumerate() {
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: (*sku).to_string(),
            barcode: Some(format!("600{:010}", index + 1)),
            name: (*name).to_string(),
            price_cents: price * 100,
            quantity_available: stock,
        };

        if let Err(e) = db.products().insert(&product).await {
            warn!(sku = %product.sku, error = %e, "Failed to insert product");
            continue;
        }
    }
    info!(products = CATALOG.len(), stock, "Catalog seeded");

    for (phone, name) in MEMBERS {
        let account = db.loyalty().create(phone, Some(name)).await?;
        info!(account_id = %account.id, phone = %account.phone, "Loyalty member seeded");
    }

    db.close().await;
    info!("Seed complete");
    Ok(())
}
